pub mod frame;
pub mod kbrk;
pub mod vm;
