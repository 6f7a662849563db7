//! # 执行配置
//!
//! ## 核心意图（Why）
//! - 集中管理执行契约的两项策略常量：缺省时间戳偏移与旁路输出标签上限；
//! - 运行器把用户配置以 TOML 形式交给核心，解析与校验在实例构造前完成，执行期只读。
//!
//! ## 行为契约（What）
//! - 缺省值：偏移为零，标签上限 1000；
//! - 未知字段、零上限均视为配置错误，返回 [`FlowError::InvalidConfiguration`]；
//! - 回调通过 `allowed_timestamp_skew()` 返回 `Some` 时覆盖这里的偏移。
//!
//! ```toml
//! timestamp_skew = "unbounded"
//! max_side_output_tags = 64
//! ```

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::{
    error::{FlowError, Result},
    time::TimestampSkew,
};

/// 旁路输出标签数量的缺省上限。
pub const DEFAULT_MAX_SIDE_OUTPUT_TAGS: usize = 1000;

/// 执行策略。
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutionSettings {
    timestamp_skew: TimestampSkew,
    max_side_output_tags: usize,
}

impl ExecutionSettings {
    pub fn new(timestamp_skew: TimestampSkew, max_side_output_tags: usize) -> Result<Self> {
        let settings = Self {
            timestamp_skew,
            max_side_output_tags,
        };
        settings.validate()?;
        Ok(settings)
    }

    /// 从 TOML 文本解析并校验。
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let settings: Self =
            toml::from_str(source).map_err(|err| FlowError::InvalidConfiguration {
                detail: err.to_string(),
            })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn timestamp_skew(&self) -> TimestampSkew {
        self.timestamp_skew
    }

    pub fn max_side_output_tags(&self) -> usize {
        self.max_side_output_tags
    }

    pub fn with_timestamp_skew(mut self, skew: TimestampSkew) -> Self {
        self.timestamp_skew = skew;
        self
    }

    /// 调整标签上限；零值在 [`validate`](Self::validate) 中被拒绝。
    pub fn with_max_side_output_tags(mut self, limit: usize) -> Self {
        self.max_side_output_tags = limit;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_side_output_tags == 0 {
            return Err(FlowError::InvalidConfiguration {
                detail: "max_side_output_tags must be greater than zero".to_owned(),
            });
        }
        Ok(())
    }
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            timestamp_skew: TimestampSkew::ZERO,
            max_side_output_tags: DEFAULT_MAX_SIDE_OUTPUT_TAGS,
        }
    }
}

/// 运行器交给回调的只读管道选项。
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineOptions {
    job_name: Option<String>,
    options: BTreeMap<String, String>,
}

impl PipelineOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_toml_str(source: &str) -> Result<Self> {
        toml::from_str(source).map_err(|err| FlowError::InvalidConfiguration {
            detail: err.to_string(),
        })
    }

    pub fn with_job_name(mut self, job_name: impl Into<String>) -> Self {
        self.job_name = Some(job_name.into());
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn job_name(&self) -> Option<&str> {
        self.job_name.as_deref()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.options.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}
