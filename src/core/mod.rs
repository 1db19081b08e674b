pub mod bktree;
pub mod duplicate;
pub mod fingerprint;
pub mod frames;
pub mod hash;
pub mod mover;
pub mod scanner;
