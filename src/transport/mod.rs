pub mod tcp;
pub mod traits;

pub use tcp::TcpProducer;
pub use traits::CommandProducer;
