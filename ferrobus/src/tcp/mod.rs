pub(crate) mod client;
pub(crate) mod frame;
pub(crate) mod server;
