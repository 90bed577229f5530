// ABOUTME: Container runtime abstraction for Burrow sandboxes
// ABOUTME: Defines the Provider trait and re-exports the Docker implementation

pub mod providers;

pub use providers::{
    docker::DockerProvider, BindMount, ContainerConfig, ContainerInfo, ContainerStatus, ExecResult,
    ExecStream, OutputChunk, PortMapping, Provider, ProviderError, StreamType,
};
