//! # 旁路输入
//!
//! ## 核心意图（Why）
//! - [`SideInputView<T>`] 以名称标识一份只读旁路数据，类型参数约束物化值的类型；
//! - 物化由外部 [`SideInputReader`] 完成（可能阻塞在外部存储上），核心只负责校验视图
//!   是否已声明、解析当前窗口、还原类型。
//!
//! ## 行为契约（What）
//! - 未声明的视图返回 [`FlowError::NotASideInput`]；
//! - 物化值类型不符返回 [`FlowError::SideInputTypeMismatch`]。

use std::{
    any::{Any, type_name},
    collections::BTreeSet,
    fmt,
    marker::PhantomData,
    sync::Arc,
};

use crate::{
    error::{FlowError, Result},
    window::Window,
};

/// 带类型的旁路输入视图。
pub struct SideInputView<T> {
    id: Arc<str>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> SideInputView<T> {
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self {
            id: id.into(),
            _marker: PhantomData,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl<T> Clone for SideInputView<T> {
    fn clone(&self) -> Self {
        Self {
            id: Arc::clone(&self.id),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for SideInputView<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SideInputView")
            .field("id", &self.id)
            .field("type", &type_name::<T>())
            .finish()
    }
}

/// 物化后的旁路输入值。
pub type MaterializedValue = Arc<dyn Any + Send + Sync>;

/// 外部旁路输入读取方。
///
/// # 契约说明（What）
/// - `read` 返回视图在 `window` 下的物化值；实现可以阻塞在外部存储上；
/// - 核心不负责取消，调度器通过 [`InterruptSignal`](crate::lifecycle::InterruptSignal)
///   中断时，核心在下一次访问前返回中断错误。
pub trait SideInputReader: Send + Sync {
    fn read(&self, view: &str, window: &Window) -> Result<MaterializedValue>;
}

/// 没有任何旁路输入的读取方。
#[derive(Clone, Copy, Debug, Default)]
pub struct NoSideInputs;

impl SideInputReader for NoSideInputs {
    fn read(&self, view: &str, _window: &Window) -> Result<MaterializedValue> {
        Err(FlowError::NotASideInput {
            view: view.to_owned(),
        })
    }
}

/// 变换声明的旁路输入集合与读取方。
#[derive(Clone)]
pub(crate) struct SideInputs {
    declared: BTreeSet<Arc<str>>,
    reader: Arc<dyn SideInputReader>,
}

impl SideInputs {
    pub(crate) fn new(declared: BTreeSet<Arc<str>>, reader: Arc<dyn SideInputReader>) -> Self {
        Self { declared, reader }
    }

    pub(crate) fn len(&self) -> usize {
        self.declared.len()
    }

    pub(crate) fn ensure_declared(&self, view: &str) -> Result<()> {
        if self.declared.contains(view) {
            Ok(())
        } else {
            Err(FlowError::NotASideInput {
                view: view.to_owned(),
            })
        }
    }

    /// 校验声明、读取并还原类型。
    pub(crate) fn resolve<T>(&self, view: &SideInputView<T>, window: &Window) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.ensure_declared(view.id())?;
        let value = self.reader.read(view.id(), window)?;
        value
            .downcast_ref::<T>()
            .cloned()
            .ok_or_else(|| FlowError::SideInputTypeMismatch {
                view: view.id().to_owned(),
                expected: type_name::<T>(),
            })
    }
}

impl fmt::Debug for SideInputs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SideInputs")
            .field("declared", &self.declared)
            .finish_non_exhaustive()
    }
}
