//! Inbound connectivity signal.
//!
//! The platform (or a test) owns a [`ConnectivityMonitor`] and flips it between online and
//! offline; the pipeline only holds receivers.

// crates.io
use tokio::sync::watch;
// self
use crate::_prelude::*;

/// Last known connectivity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Connectivity {
	/// The network is reachable as far as the platform knows.
	#[default]
	Online,
	/// The platform confirmed the network is unreachable.
	Offline,
}
impl Connectivity {
	/// Returns `true` when offline.
	pub fn is_offline(self) -> bool {
		matches!(self, Connectivity::Offline)
	}
}

/// Sender side of the connectivity channel.
#[derive(Clone, Debug)]
pub struct ConnectivityMonitor {
	sender: Arc<watch::Sender<Connectivity>>,
}
impl ConnectivityMonitor {
	/// Creates a monitor starting at `initial`.
	pub fn new(initial: Connectivity) -> Self {
		let (sender, _) = watch::channel(initial);

		Self { sender: Arc::new(sender) }
	}

	/// Publishes a new state. Returns `true` when it differs from the previous one.
	pub fn set(&self, state: Connectivity) -> bool {
		self.sender.send_if_modified(|current| {
			if *current == state {
				return false;
			}

			*current = state;

			true
		})
	}

	/// Marks the network reachable.
	pub fn set_online(&self) -> bool {
		self.set(Connectivity::Online)
	}

	/// Marks the network unreachable.
	pub fn set_offline(&self) -> bool {
		self.set(Connectivity::Offline)
	}

	/// Returns the current state.
	pub fn current(&self) -> Connectivity {
		*self.sender.borrow()
	}

	/// Returns a receiver to hand to the pipeline.
	pub fn subscribe(&self) -> watch::Receiver<Connectivity> {
		self.sender.subscribe()
	}
}
impl Default for ConnectivityMonitor {
	fn default() -> Self {
		Self::new(Connectivity::Online)
	}
}
