pub mod shell;
pub mod tokenize;
pub mod types;

pub use shell::{redirect_targets, segment};
pub use tokenize::{base_command, env_assignments, tokenize};
pub use types::{Operator, Segment, Segmented};
