pub use self::{
    path::get_path,
    types::{PoolOption, PoolType, QueryResult},
};

mod path;
mod push_subscription;
mod types;
