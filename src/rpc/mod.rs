pub mod health;
pub mod service;

pub mod proto {
    tonic::include_proto!("executor");

    pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("executor_descriptor");
}

pub use service::ExecutorSvc;
