use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use crate::utils::request_id::gen_request_id;
use crate::utils::sync::lock;
use super::types::MethodDescriptor;

/// 请求级别的键值存储，用于处理器之间传递数据
#[derive(Default)]
pub struct Locals {
    values: Mutex<HashMap<String, Arc<dyn Any + Send + Sync>>>,
}

impl Locals {
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入一个值，返回是否覆盖了旧值
    pub fn insert<T>(&self, key: impl Into<String>, value: T) -> bool
    where
        T: Any + Send + Sync,
    {
        lock(&self.values).insert(key.into(), Arc::new(value)).is_some()
    }

    /// 读取一个值；类型不符时返回 `None`
    pub fn get<T>(&self, key: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        let value = lock(&self.values).get(key).cloned()?;
        value.downcast::<T>().ok()
    }

    pub fn remove(&self, key: &str) -> bool {
        lock(&self.values).remove(key).is_some()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        lock(&self.values).contains_key(key)
    }

    pub fn len(&self) -> usize {
        lock(&self.values).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for Locals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<String> = lock(&self.values).keys().cloned().collect();
        f.debug_struct("Locals").field("keys", &keys).finish()
    }
}

/// 单次调用的上下文
#[derive(Debug)]
pub struct Context {
    method: MethodDescriptor,
    request_id: String,
    locals: Locals,
}

impl Context {
    pub fn new(method: MethodDescriptor, request_id_length: usize) -> Self {
        Self {
            method,
            request_id: gen_request_id(request_id_length),
            locals: Locals::new(),
        }
    }

    pub fn method(&self) -> &MethodDescriptor {
        &self.method
    }

    /// 方法完整路径
    pub fn path(&self) -> &str {
        &self.method.path
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn locals(&self) -> &Locals {
        &self.locals
    }
}
