// Infrastructure adapters for the pipeline ports.

pub mod archiver;
pub mod macros;
pub mod metadata_writer;
pub mod object_backend;
pub mod project_loader;
pub mod syn_frontend;

pub use archiver::ArCommand;
pub use metadata_writer::JsonMetadataWriter;
pub use object_backend::ObjectBackend;
pub use project_loader::ProjectLoader;
pub use syn_frontend::SynFrontEnd;
