pub mod activations;
mod init;
pub mod layers;
pub mod loss;
mod model;
mod network;
mod sequential;

pub use init::xavier_uniform;
pub use model::{Mode, Model, TensorSpec};
pub use network::Network;
pub use sequential::Sequential;
