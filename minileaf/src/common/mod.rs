pub mod constants;
pub mod doc_id;
pub mod document;
pub mod task_util;
pub mod time;
pub mod type_utils;
pub mod value;

pub use constants::*;
pub use doc_id::{DocId, IdGenerator, IdKind};
pub use document::Document;
pub use task_util::{async_task, schedule_task, stop_scheduled_tasks};
pub use time::get_current_time_millis;
pub use type_utils::{atomic, Atomic, ReadExecutor, WriteExecutor};
pub use value::Value;
