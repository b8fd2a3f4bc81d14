//! Session lifecycle published by the token manager.

/// Why a session ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EndReason {
	/// Credentials were cleared explicitly.
	Logout,
	/// The refresh endpoint rejected the refresh token or could not be reached.
	RefreshFailed,
}
impl EndReason {
	/// Returns a stable label suitable for log fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			EndReason::Logout => "logout",
			EndReason::RefreshFailed => "refresh_failed",
		}
	}
}

/// Current session state, observable through
/// [`TokenManager::subscribe`](crate::auth::TokenManager::subscribe).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SessionState {
	/// No credentials have been stored yet.
	#[default]
	Anonymous,
	/// Credentials are held.
	Active,
	/// Credentials were destroyed; the user must log in again.
	Ended {
		/// What ended the session.
		reason: EndReason,
	},
}
impl SessionState {
	/// Returns `true` while credentials are held.
	pub fn is_active(&self) -> bool {
		matches!(self, SessionState::Active)
	}
}
