//! # 测试数据 Fixtures
//!
//! 提供测试用的维护对象数据

use serde_json::{Value, json};

/// 维护对象测试数据构建器
#[derive(Debug, Clone)]
pub struct ServiceObjectFixture {
    /// 对象 ID
    pub id: i64,
    /// 对象名称
    pub name: String,
    /// 所在地区
    pub region: String,
    /// 电压等级（kV）
    pub voltage_kv: f64,
    /// 标签
    pub tags: Vec<String>,
}

impl Default for ServiceObjectFixture {
    fn default() -> Self {
        Self {
            id: 1,
            name: "ТП-1".to_string(),
            region: "Бишкек".to_string(),
            voltage_kv: 10.0,
            tags: vec!["плановое".to_string()],
        }
    }
}

impl ServiceObjectFixture {
    /// 创建新的 fixture
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置 ID
    #[must_use]
    pub fn id(mut self, id: i64) -> Self {
        self.id = id;
        self.name = format!("ТП-{id}");
        self
    }

    /// 设置地区
    #[must_use]
    pub fn region(mut self, region: &str) -> Self {
        self.region = region.to_string();
        self
    }

    /// 转换为 JSON
    #[must_use]
    pub fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "name": self.name,
            "region": self.region,
            "voltage_kv": self.voltage_kv,
            "tags": self.tags,
        })
    }
}

/// 生成 `count` 个编号从 1 开始的维护对象
#[must_use]
pub fn service_objects(count: usize) -> Vec<Value> {
    (1..=count)
        .map(|id| {
            ServiceObjectFixture::new()
                .id(i64::try_from(id).unwrap_or(i64::MAX))
                .to_json()
        })
        .collect()
}
