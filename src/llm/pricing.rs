//! 模型价格表：按模型名查每百万 token 的输入 / 输出价格，计算单次调用费用
//!
//! 查表顺序：精确匹配 -> 最长前缀匹配（如 `gpt-4o-mini-2024-07-18` 命中 `gpt-4o-mini`）。
//! 未知模型不报错：费用记 0 并打印警告。

use std::collections::HashMap;

use serde::Deserialize;

use crate::llm::TokenUsage;

/// 单个模型的价格（美元 / 百万 token）
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ModelPrice {
    pub cost_per_million_input: f64,
    #[serde(default)]
    pub cost_per_million_output: f64,
}

impl ModelPrice {
    pub fn new(input: f64, output: f64) -> Self {
        Self {
            cost_per_million_input: input,
            cost_per_million_output: output,
        }
    }
}

/// 价格表
#[derive(Debug, Clone)]
pub struct PriceTable {
    models: HashMap<String, ModelPrice>,
}

impl Default for PriceTable {
    fn default() -> Self {
        let mut models = HashMap::new();
        models.insert("gpt-4o-mini".to_string(), ModelPrice::new(0.15, 0.60));
        models.insert("gpt-4o".to_string(), ModelPrice::new(2.50, 10.00));
        models.insert("gpt-4.1-mini".to_string(), ModelPrice::new(0.40, 1.60));
        models.insert("gpt-4.1".to_string(), ModelPrice::new(2.00, 8.00));
        models.insert("o4-mini".to_string(), ModelPrice::new(1.10, 4.40));
        models.insert("deepseek-chat".to_string(), ModelPrice::new(0.27, 1.10));
        models.insert("deepseek-reasoner".to_string(), ModelPrice::new(0.55, 2.19));
        models.insert("text-embedding-3-small".to_string(), ModelPrice::new(0.02, 0.0));
        models.insert("text-embedding-3-large".to_string(), ModelPrice::new(0.13, 0.0));
        Self { models }
    }
}

impl PriceTable {
    /// 空表（所有模型均视为未知）
    pub fn empty() -> Self {
        Self {
            models: HashMap::new(),
        }
    }

    /// 默认表叠加配置中的覆盖项；负价格被截断为 0
    pub fn with_overrides(mut self, overrides: &HashMap<String, ModelPrice>) -> Self {
        for (name, price) in overrides {
            self.insert(name.clone(), *price);
        }
        self
    }

    pub fn insert(&mut self, model: impl Into<String>, price: ModelPrice) {
        let price = ModelPrice::new(
            price.cost_per_million_input.max(0.0),
            price.cost_per_million_output.max(0.0),
        );
        self.models.insert(model.into(), price);
    }

    pub fn price_for(&self, model: &str) -> Option<ModelPrice> {
        if let Some(price) = self.models.get(model) {
            return Some(*price);
        }
        self.models
            .iter()
            .filter(|(name, _)| model.starts_with(name.as_str()))
            .max_by_key(|(name, _)| name.len())
            .map(|(_, price)| *price)
    }

    /// 单次调用费用；未知模型返回 0 并警告
    pub fn cost(&self, model: &str, usage: TokenUsage) -> f64 {
        match self.price_for(model) {
            Some(price) => {
                (usage.prompt_tokens as f64 * price.cost_per_million_input
                    + usage.completion_tokens as f64 * price.cost_per_million_output)
                    / 1_000_000.0
            }
            None => {
                tracing::warn!(model = %model, "no pricing entry for model, cost counted as 0");
                0.0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cost_known_model() {
        let table = PriceTable::default();
        let cost = table.cost("gpt-4o-mini", TokenUsage::new(1_000_000, 1_000_000));
        assert!((cost - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_prefix_match_prefers_longest() {
        let table = PriceTable::default();
        let price = table.price_for("gpt-4o-mini-2024-07-18").unwrap();
        assert_eq!(price, ModelPrice::new(0.15, 0.60));
    }

    #[test]
    fn test_unknown_model_costs_zero() {
        let table = PriceTable::default();
        assert_eq!(table.cost("mystery-model", TokenUsage::new(500, 500)), 0.0);
    }

    #[test]
    fn test_overrides_clamp_negative() {
        let mut overrides = HashMap::new();
        overrides.insert("local".to_string(), ModelPrice::new(-3.0, 2.0));
        let table = PriceTable::empty().with_overrides(&overrides);
        assert_eq!(table.price_for("local"), Some(ModelPrice::new(0.0, 2.0)));
    }
}
