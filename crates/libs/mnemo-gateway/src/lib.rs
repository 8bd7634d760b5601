//! # mnemo-gateway: the write-gated memory path
//!
//! A structured memory card comes in; a policy decision, a canonical
//! Markdown rendering, a payload fingerprint, an audit row, and an
//! external-memory write come out. When the external service is down the
//! payload lands in the durable outbox and the worker in [`outbox_worker`]
//! delivers it later, completing the `write_failed → flush_success` audit
//! chain keyed by the shared outbox id.

pub mod card;
pub mod external;
pub mod gateway;
pub mod outbox_worker;
pub mod policy;
pub mod report;
