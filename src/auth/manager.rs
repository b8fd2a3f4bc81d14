//! Credential owner with single-flight refresh.
//!
//! The manager is the only writer of the credential pair. Every mutation (login, refresh,
//! invalidation) bumps a generation counter, and [`TokenManager::attach`] reports the
//! generation it attached so a late 401 for a replaced token reuses the newer pair instead
//! of refreshing again.
//!
//! A refresh runs as a detached tokio task wrapped in a shared future. Callers that arrive
//! while it is in flight clone the same handle, so N concurrent 401s produce exactly one
//! call to the refresh endpoint, and dropping a waiter (for example on timeout) never
//! cancels the refresh itself.

// crates.io
use futures_util::{
	FutureExt,
	future::{BoxFuture, Shared},
};
use serde_json::json;
use tokio::sync::watch;
// self
use crate::{
	_prelude::*,
	auth::{Credentials, EndReason, RefreshMetrics, RefreshResponse, SessionState, TokenSecret},
	classify,
	clock::Clock,
	config::ClientConfig,
	error::{AuthError, ConfigError},
	http::{ApiRequest, HttpTransport, Method},
	obs::{self, OpKind, OpOutcome, OpSpan},
	store::{self, KeyValueStore, StoreError},
};

type SharedRefresh = Shared<BoxFuture<'static, Result<Credentials, AuthError>>>;

/// Owns the access/refresh pair and serializes refreshes.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct TokenManager {
	inner: Arc<Inner>,
}
impl TokenManager {
	/// Creates a manager with no credentials loaded.
	///
	/// Call [`restore`](Self::restore) to pick up credentials persisted by a previous run.
	pub fn new(
		config: &ClientConfig,
		transport: Arc<dyn HttpTransport>,
		store: Arc<dyn KeyValueStore>,
		clock: Arc<dyn Clock>,
	) -> Result<Self, ConfigError> {
		let refresh_url = config.refresh_url()?;
		let (session, _) = watch::channel(SessionState::Anonymous);

		Ok(Self {
			inner: Arc::new(Inner {
				transport,
				store,
				clock,
				refresh_url,
				storage_key: config.credentials_key.clone(),
				state: Mutex::new(TokenState::default()),
				persist: AsyncMutex::new(()),
				session,
				metrics: RefreshMetrics::default(),
			}),
		})
	}

	/// Loads persisted credentials, if any, and activates the session.
	pub async fn restore(&self) -> Result<Option<Credentials>, StoreError> {
		let _persist = self.inner.persist.lock().await;
		let loaded: Option<Credentials> =
			store::load_json(self.inner.store.as_ref(), &self.inner.storage_key).await?;

		if let Some(credentials) = &loaded {
			self.inner.replace(Some(credentials.clone()));
			self.inner.session.send_replace(SessionState::Active);
		}

		Ok(loaded)
	}

	/// Stores a fresh pair obtained from a login.
	///
	/// The pair is persisted before it becomes visible to [`attach`](Self::attach).
	pub async fn login(&self, credentials: Credentials) -> Result<(), StoreError> {
		let _persist = self.inner.persist.lock().await;

		store::save_json(self.inner.store.as_ref(), &self.inner.storage_key, &credentials).await?;
		self.inner.replace(Some(credentials));
		self.inner.session.send_replace(SessionState::Active);

		Ok(())
	}

	/// Destroys the credentials in memory and in the store, then publishes
	/// [`SessionState::Ended`] with [`EndReason::Logout`].
	pub async fn invalidate(&self) -> Result<(), StoreError> {
		let _persist = self.inner.persist.lock().await;

		self.inner.replace(None);
		self.inner.publish_end(EndReason::Logout);
		self.inner.store.remove(&self.inner.storage_key).await
	}

	/// Sets `Authorization: Bearer <access>` and returns the credential generation used.
	///
	/// Leaves the request untouched and returns `None` when no credentials are held.
	pub fn attach(&self, request: &mut ApiRequest) -> Option<u64> {
		let state = self.inner.state.lock();
		let credentials = state.credentials.as_ref()?;

		request.set_header("authorization", credentials.bearer());

		Some(state.generation)
	}

	/// Refreshes the pair, joining a refresh already in flight.
	pub async fn refresh(&self) -> Result<Credentials, AuthError> {
		self.refresh_inner(None, Mode::Required).await
	}

	/// Refreshes a pair that is about to expire but has not been rejected yet.
	///
	/// A failure leaves the current pair and the session untouched, so the caller can still
	/// send with the old access token and fall back to the 401 path.
	pub async fn refresh_preemptive(&self) -> Result<Credentials, AuthError> {
		self.refresh_inner(None, Mode::Advisory).await
	}

	/// Refreshes the pair in response to a 401 for credentials of `generation`.
	///
	/// When the pair was already replaced since `generation` was attached, the current pair
	/// is returned without touching the network.
	pub async fn refresh_stale(&self, generation: u64) -> Result<Credentials, AuthError> {
		self.refresh_inner(Some(generation), Mode::Required).await
	}

	/// Returns `true` when refreshable credentials expire within `window`.
	pub fn needs_refresh(&self, window: Duration) -> bool {
		if window.is_zero() {
			return false;
		}

		let now = self.inner.clock.now();
		let state = self.inner.state.lock();

		state
			.credentials
			.as_ref()
			.is_some_and(|credentials| credentials.refresh.is_some() && credentials.expires_within(now, window))
	}

	/// Returns a copy of the current pair.
	pub fn credentials(&self) -> Option<Credentials> {
		self.inner.state.lock().credentials.clone()
	}

	/// Returns the current session state.
	pub fn session(&self) -> SessionState {
		*self.inner.session.borrow()
	}

	/// Subscribes to session state changes.
	pub fn subscribe(&self) -> watch::Receiver<SessionState> {
		self.inner.session.subscribe()
	}

	/// Refresh counters.
	pub fn metrics(&self) -> &RefreshMetrics {
		&self.inner.metrics
	}

	async fn refresh_inner(&self, seen: Option<u64>, mode: Mode) -> Result<Credentials, AuthError> {
		let (handle, joined) = {
			let mut state = self.inner.state.lock();

			if seen.is_some_and(|seen| seen != state.generation) {
				return state.credentials.clone().ok_or(AuthError::MissingRefreshToken);
			}

			match &state.inflight {
				Some(inflight) => {
					self.inner.metrics.record_joined();

					(inflight.handle.clone(), Some((inflight.started_at, inflight.mode)))
				},
				None => {
					let started_at = state.generation;
					let refresh = state.credentials.as_ref().and_then(|c| c.refresh.clone());
					let task =
						tokio::spawn(run_refresh(self.inner.clone(), started_at, refresh, mode));
					let handle = async move { task.await.unwrap_or(Err(AuthError::Aborted)) }
						.boxed()
						.shared();

					state.inflight = Some(Inflight { started_at, mode, handle: handle.clone() });

					(handle, None)
				},
			}
		};
		let result = handle.await;

		// A rejected token that joined an advisory refresh still ends the session when it fails.
		if let (Err(_), Mode::Required, Some((started_at, Mode::Advisory))) = (&result, mode, joined)
		{
			self.inner.end_session(started_at).await;
		}

		result
	}
}
impl Debug for TokenManager {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenManager")
			.field("refresh_url", &self.inner.refresh_url.as_str())
			.field("session", &self.session())
			.finish_non_exhaustive()
	}
}

struct Inner {
	transport: Arc<dyn HttpTransport>,
	store: Arc<dyn KeyValueStore>,
	clock: Arc<dyn Clock>,
	refresh_url: Url,
	storage_key: String,
	state: Mutex<TokenState>,
	// Orders store writes so the persisted pair always matches the latest in-memory one.
	persist: AsyncMutex<()>,
	session: watch::Sender<SessionState>,
	metrics: RefreshMetrics,
}
impl Inner {
	fn replace(&self, credentials: Option<Credentials>) {
		let mut state = self.state.lock();

		state.credentials = credentials;
		state.generation += 1;
		state.inflight = None;
	}

	fn publish_end(&self, reason: EndReason) {
		obs::session_ended(reason);
		self.session.send_replace(SessionState::Ended { reason });
	}

	async fn request_refresh(&self, refresh: &TokenSecret) -> Result<Credentials, AuthError> {
		let mut request = ApiRequest::new(Method::Post, self.refresh_url.clone());

		request
			.set_json_body(&json!({ "refresh": refresh.expose() }))
			.map_err(|e| AuthError::Transport { message: e.to_string() })?;

		let response = self
			.transport
			.send(request)
			.await
			.map_err(|e| AuthError::Transport { message: classify::render_chain(&e) })?;

		if !response.is_success() {
			return Err(AuthError::Rejected { status: response.status });
		}

		let de = &mut serde_json::Deserializer::from_slice(&response.body);
		let body: RefreshResponse = serde_path_to_error::deserialize(de)
			.map_err(|e| AuthError::MalformedResponse { message: e.to_string() })?;

		Ok(body.into_credentials(refresh, self.clock.now()))
	}

	async fn commit(&self, started_at: u64, credentials: Credentials) -> Result<Credentials, AuthError> {
		let _persist = self.persist.lock().await;

		{
			let mut state = self.state.lock();

			state.clear_inflight(started_at);

			// A login or logout replaced the pair while the refresh was in flight.
			if state.generation != started_at {
				return state.credentials.clone().ok_or(AuthError::Aborted);
			}

			state.credentials = Some(credentials.clone());
			state.generation += 1;
		}

		if let Err(e) =
			store::save_json(self.store.as_ref(), &self.storage_key, &credentials).await
		{
			obs::storage_failed("credentials", &e);
		}

		self.session.send_replace(SessionState::Active);

		Ok(credentials)
	}

	async fn fail(&self, started_at: u64, mode: Mode) {
		match mode {
			Mode::Required => self.abandon(started_at).await,
			Mode::Advisory => self.release(started_at),
		}
	}

	fn release(&self, started_at: u64) {
		self.state.lock().clear_inflight(started_at);
	}

	async fn abandon(&self, started_at: u64) {
		self.release(started_at);
		self.end_session(started_at).await;
	}

	// Drops the pair unless a login, logout, or successful refresh replaced it meanwhile.
	async fn end_session(&self, started_at: u64) {
		let _persist = self.persist.lock().await;
		let ended = {
			let mut state = self.state.lock();

			if state.generation == started_at && state.credentials.is_some() {
				state.credentials = None;
				state.generation += 1;

				true
			} else {
				false
			}
		};

		if ended {
			self.publish_end(EndReason::RefreshFailed);

			if let Err(e) = self.store.remove(&self.storage_key).await {
				obs::storage_failed("credentials", &e);
			}
		}
	}
}

#[derive(Default)]
struct TokenState {
	credentials: Option<Credentials>,
	generation: u64,
	inflight: Option<Inflight>,
}
impl TokenState {
	fn clear_inflight(&mut self, started_at: u64) {
		if self.inflight.as_ref().is_some_and(|inflight| inflight.started_at == started_at) {
			self.inflight = None;
		}
	}
}

struct Inflight {
	started_at: u64,
	mode: Mode,
	handle: SharedRefresh,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
	// Triggered by a rejected token; failure ends the session.
	Required,
	// Triggered by an upcoming expiry; failure keeps the pair.
	Advisory,
}

async fn run_refresh(
	inner: Arc<Inner>,
	started_at: u64,
	refresh: Option<TokenSecret>,
	mode: Mode,
) -> Result<Credentials, AuthError> {
	const KIND: OpKind = OpKind::Refresh;

	let Some(refresh) = refresh else {
		inner.fail(started_at, mode).await;

		return Err(AuthError::MissingRefreshToken);
	};
	let span = OpSpan::new(KIND, "refresh");

	obs::record_op_outcome(KIND, OpOutcome::Attempt);
	inner.metrics.record_attempt();

	let result = span
		.instrument(async {
			match inner.request_refresh(&refresh).await {
				Ok(credentials) => inner.commit(started_at, credentials).await,
				Err(e) => {
					inner.fail(started_at, mode).await;

					Err(e)
				},
			}
		})
		.await;

	match &result {
		Ok(_) => {
			inner.metrics.record_success();
			obs::record_op_outcome(KIND, OpOutcome::Success);
		},
		Err(_) => {
			inner.metrics.record_failure();
			obs::record_op_outcome(KIND, OpOutcome::Failure);
		},
	}

	result
}
