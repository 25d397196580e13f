// Module Definition
pub mod circuit; // Named gates, fusion windows, schedule execution
pub mod controller;
pub mod dispatch;
pub mod fusion;
pub mod gate;
pub mod kernels; // Computation kernels with parallel execution
pub mod memory; // Paged amplitude storage
pub mod permutation;
pub mod qubit;
pub mod relocation;
pub mod state; // Main logic binding memory, relocation and dispatch
pub mod target;
pub mod transport;
