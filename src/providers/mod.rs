//! Provider implementations, one per resource kind / hypervisor.

pub mod kvm;

pub use kvm::KvmHaProvider;
