pub mod disasm;
pub mod rewrite;
pub mod run;
pub mod verify;
