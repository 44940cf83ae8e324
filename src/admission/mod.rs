pub mod auto_block;
pub mod block_cache;
pub mod clock;
pub mod gate;
pub mod policy;
pub mod violations;
pub mod window;
