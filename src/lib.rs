//! Resilient API client layer: single-flight credential refresh, idempotence-aware retries,
//! a durable offline mutation queue, and a closed error taxonomy behind one request pipeline.
//!
//! The entry point is [`pipeline::RequestPipeline`]. Every call goes through the same state
//! machine: attach credentials, send, recover from a 401 with exactly one refresh, retry
//! transient failures when the request is safe to repeat, queue mutations made while
//! offline, and classify whatever is left into an [`classify::ApiError`].

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod classify;
pub mod clock;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod http;
pub mod obs;
pub mod pipeline;
pub mod queue;
pub mod request;
pub mod retry;
pub mod store;

mod _prelude {
	pub use std::{
		collections::BTreeMap,
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::Arc,
		time::Duration,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::OffsetDateTime;
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(test)] use {color_eyre as _, httpmock as _};
