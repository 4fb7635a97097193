pub mod client;
pub mod gateway;

pub use gateway::{KubeGateway, KubernetesGateway};
