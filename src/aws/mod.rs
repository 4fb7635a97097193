pub mod client;
pub mod gateway;

pub use client::AwsClients;
pub use gateway::{CloudIdentityGateway, IamGateway, TemporaryCredentials};
