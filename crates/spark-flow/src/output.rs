//! # 输出通道：标签与 sink 契约
//!
//! ## 核心意图（Why）
//! - [`OutputTag<T>`] 以名称区分旁路输出通道，类型参数在编译期约束发射值的类型；
//! - [`OutputSink<T>`] 是外部 sink 协作方的接口，核心只保证“发射调用返回前记录已交付”；
//! - 旁路输出的值类型各不相同，路由器内部通过 [`ErasedSink`] 擦除类型，再在交付时还原。
//!
//! ## 风险提示（Trade-offs）
//! - 擦除后的交付依赖一次 `downcast`；同名标签以不同类型声明时会在发射期返回
//!   [`FlowError::TagTypeMismatch`]，而不是在编译期发现。

use std::{
    any::{Any, type_name},
    fmt,
    marker::PhantomData,
    sync::Arc,
};

use crate::{
    error::{FlowError, Result},
    record::Record,
};

/// 通道标识：主输出或某个旁路标签。
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChannelId {
    Main,
    Tagged(Arc<str>),
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelId::Main => f.write_str("main"),
            ChannelId::Tagged(id) => write!(f, "tag:{id}"),
        }
    }
}

/// 带类型的旁路输出标签。
///
/// 相等性只看名称；类型参数不参与比较。
pub struct OutputTag<T> {
    id: Arc<str>,
    _marker: PhantomData<fn(T)>,
}

impl<T> OutputTag<T> {
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self {
            id: id.into(),
            _marker: PhantomData,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn channel(&self) -> ChannelId {
        ChannelId::Tagged(Arc::clone(&self.id))
    }
}

impl<T> Clone for OutputTag<T> {
    fn clone(&self) -> Self {
        Self {
            id: Arc::clone(&self.id),
            _marker: PhantomData,
        }
    }
}

impl<T> PartialEq for OutputTag<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for OutputTag<T> {}

impl<T> fmt::Debug for OutputTag<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputTag")
            .field("id", &self.id)
            .field("type", &type_name::<T>())
            .finish()
    }
}

/// 外部 sink 协作方。
///
/// # 契约说明（What）
/// - `accept` 在发射调用内同步执行；返回错误时路由器原样向上传播，不做重试；
/// - 已交付的记录不会因后续失败被撤回，投递语义由 sink 与调度器自行约定。
pub trait OutputSink<T>: Send + Sync {
    fn accept(&self, record: Record<T>) -> Result<()>;
}

impl<T, S> OutputSink<T> for Arc<S>
where
    S: OutputSink<T> + ?Sized,
{
    fn accept(&self, record: Record<T>) -> Result<()> {
        (**self).accept(record)
    }
}

/// 擦除值类型后的 sink，仅供路由器内部使用。
pub(crate) trait ErasedSink: Send + Sync {
    fn accept_erased(&self, tag: &str, record: Record<Box<dyn Any + Send>>) -> Result<()>;
}

/// 把 `OutputSink<T>` 适配为 [`ErasedSink`]。
pub(crate) struct TypedSink<T> {
    inner: Arc<dyn OutputSink<T>>,
}

impl<T> TypedSink<T> {
    pub(crate) fn new(inner: Arc<dyn OutputSink<T>>) -> Self {
        Self { inner }
    }
}

impl<T: Send + 'static> ErasedSink for TypedSink<T> {
    fn accept_erased(&self, tag: &str, record: Record<Box<dyn Any + Send>>) -> Result<()> {
        let (value, timestamp, windows) = record.into_parts();
        let value = value
            .downcast::<T>()
            .map_err(|_| FlowError::TagTypeMismatch {
                tag: tag.to_owned(),
                expected: type_name::<T>(),
            })?;
        self.inner.accept(Record::new(*value, timestamp, windows))
    }
}

/// 一个已声明的旁路输出：标签名与擦除后的 sink。
pub(crate) struct TaggedOutput {
    pub(crate) id: Arc<str>,
    pub(crate) sink: Arc<dyn ErasedSink>,
}

impl TaggedOutput {
    pub(crate) fn new<T: Send + 'static>(tag: &OutputTag<T>, sink: Arc<dyn OutputSink<T>>) -> Self {
        Self {
            id: Arc::clone(&tag.id),
            sink: Arc::new(TypedSink::new(sink)),
        }
    }
}
