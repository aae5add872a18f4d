pub mod protocols;
pub mod server;
pub mod utils;
pub mod virtual_outputs;
