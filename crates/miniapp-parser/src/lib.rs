//! Mini-app parser runtime
//!
//! Runs a caller-supplied worker against a mini-app backend, rotating over
//! the identities of a `userbot_pool::IdentityPool`. Per identity it keeps a
//! lazily acquired, expiring auth token; per cycle it hands the worker a
//! snapshot of that token, the matching init-data and the identity's proxy.
//!
//! ```text
//! Parser ── select slot ──▶ IdentityPool
//!   │ ensure token ──▶ TokenManager ── launch params ──▶ SessionClient
//!   │                      └──── POST auth payload ──▶ Requester
//!   └ worker(ctx, args) ──▶ MiniAppStrategy
//! ```

pub mod error;
pub mod observer;
pub mod options;
pub mod scheduler;
pub mod shaping;
pub mod strategy;
pub mod token;

pub use error::{Error, Result};
pub use observer::{CycleObserver, NoopObserver};
pub use options::{DEFAULT_TOKEN_TTL, ParserOptions, TokenTtl, WorkerTimeout};
pub use scheduler::{Parser, WorkerHandle};
pub use shaping::RequestShaper;
pub use strategy::{MiniAppStrategy, WorkerContext, WorkerFuture};
pub use token::TokenManager;
