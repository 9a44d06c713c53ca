//! Connection Registry: who is online.
//!
//! Maps each registered display name to the handle of the connection that
//! holds it. The admission handler inserts, a connection's own pipeline
//! removes, and the router looks up recipients and senders.
//!
//! ```text
//! AdmissionHandler --register--> ConnectionRegistry <--lookup-- Router
//!                                   DashMap<String,
//!                                   ConnectionHandle>
//!                                        ^
//! InboundPipeline ------unregister-------+
//! ```

mod connection_registry;

pub use connection_registry::ConnectionRegistry;
