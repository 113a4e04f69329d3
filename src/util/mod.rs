pub mod file;
pub mod rand_kv;
pub mod time;
