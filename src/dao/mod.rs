pub use self::{
    memory::MemoryStore,
    postgre::{get_path, PoolOption, PoolType, QueryResult},
    store::SubscriptionStore,
};

mod memory;
mod postgre;
mod store;
