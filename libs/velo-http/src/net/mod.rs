//! Transport-side networking: DNS + dual-stack dialing, TLS wrapping, and
//! the per-authority connection pool.

pub mod conn;
pub mod dial;
pub mod pool;
pub(crate) mod tls;

pub use conn::{AuthorityKey, PooledConnection};
pub use dial::{Dialer, TcpDialer};
pub use pool::{ConnectionPool, Lease};
