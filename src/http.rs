//! Network transport: the provider contract and the retrying HTTP default.

pub mod client;
pub mod retry;
