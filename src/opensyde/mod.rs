pub mod sysup;
