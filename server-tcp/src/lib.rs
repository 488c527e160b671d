pub mod server;

pub use server::{process_connection, serve, spawn};

// Re-export the wire types for convenience
pub use cachet::protocol::{Request, Response};
