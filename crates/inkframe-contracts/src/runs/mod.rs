pub mod summary;

use uuid::Uuid;

pub fn new_run_id() -> String {
    format!("run-{}", Uuid::new_v4().simple())
}
