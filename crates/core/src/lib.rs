pub mod config;
pub mod context;
pub mod error;
pub mod resources;
pub mod sector;
pub mod sync;
pub mod task;

pub use config::load_dotenv;
pub use context::{RequestContext, DEFAULT_SCHED_PRIORITY};
pub use error::*;
pub use resources::{resource_table, Resources, WorkerInfo, WorkerResources, MIB};
pub use sector::SectorId;
pub use sync::CtxCond;
pub use task::{ProofType, TaskType};
