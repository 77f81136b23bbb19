use std::marker::{self, PhantomData};

use crate::dao::PoolType;

/// Typed handle over the shared pool; queries for `T` live in `dao`.
#[derive(Debug)]
pub struct Table<T> {
    pub pool: PoolType,
    _phantomdata: marker::PhantomData<T>,
}

impl<T> Table<T> {
    pub fn new(pool: PoolType) -> Self {
        Table {
            pool,
            _phantomdata: PhantomData,
        }
    }
}

impl<T> Clone for Table<T> {
    fn clone(&self) -> Self {
        Table::new(self.pool.clone())
    }
}
