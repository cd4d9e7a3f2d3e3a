//! Built-in Processors
//!
//! Two small processors every node can register out of the box: `compute`
//! (fibonacci and primality) and `data_processing` (sum, average and sort over a
//! list of numbers). Both read the operation from `op` or `operation`.

use super::registry::TaskProcessor;
use super::types::Task;
use crate::protocol::Payload;

use anyhow::{Context, anyhow, bail};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::cmp::Ordering;
use std::time::Duration;

/// Largest n whose fibonacci number fits in a u64.
const MAX_FIBONACCI_N: u64 = 93;

fn operation(task: &Task) -> &str {
    task.payload
        .get("op")
        .or_else(|| task.payload.get("operation"))
        .and_then(Value::as_str)
        .unwrap_or("unknown")
}

fn into_payload(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        _ => Payload::new(),
    }
}

pub struct ComputeProcessor;

impl ComputeProcessor {
    pub fn fibonacci(n: u64) -> anyhow::Result<u64> {
        if n > MAX_FIBONACCI_N {
            bail!("fibonacci({n}) overflows a 64-bit integer");
        }

        let (mut a, mut b) = (0u64, 1u64);
        for _ in 0..n {
            let next = a + b;
            a = b;
            b = next;
        }
        Ok(a)
    }

    pub fn is_prime(n: u64) -> bool {
        if n < 2 {
            return false;
        }
        let mut i = 2u64;
        while i.saturating_mul(i) <= n {
            if n % i == 0 {
                return false;
            }
            i += 1;
        }
        true
    }
}

#[async_trait]
impl TaskProcessor for ComputeProcessor {
    async fn process(&self, task: &Task) -> anyhow::Result<Payload> {
        match operation(task) {
            "fib" | "fibonacci" => {
                let n = task.payload.get("n").and_then(Value::as_u64).unwrap_or(10);
                let result = Self::fibonacci(n)?;
                Ok(into_payload(json!({ "result": result, "input": n })))
            }
            "prime_check" => {
                let number = task
                    .payload
                    .get("number")
                    .and_then(Value::as_u64)
                    .unwrap_or(2);
                Ok(into_payload(
                    json!({ "result": Self::is_prime(number), "number": number }),
                ))
            }
            other => Err(anyhow!("Unknown compute operation: {other}")),
        }
    }

    fn supported_task_types(&self) -> Vec<String> {
        vec!["compute".to_string()]
    }

    fn estimate_processing_time(&self, task: &Task) -> Duration {
        match operation(task) {
            "fib" | "fibonacci" => {
                let n = task.payload.get("n").and_then(Value::as_u64).unwrap_or(10);
                Duration::from_secs_f64((n as f64 * 0.001).max(0.1))
            }
            "prime_check" => Duration::from_millis(500),
            _ => Duration::from_secs(1),
        }
    }
}

pub struct DataProcessingProcessor;

impl DataProcessingProcessor {
    fn numbers(task: &Task) -> anyhow::Result<Vec<Value>> {
        let data = match task.payload.get("data") {
            Some(Value::Array(items)) => items.clone(),
            Some(other) => bail!("'data' must be a list, got {other}"),
            None => Vec::new(),
        };

        for item in &data {
            if !item.is_number() {
                bail!("'data' contains a non-numeric value: {item}");
            }
        }
        Ok(data)
    }

    fn sum(data: &[Value]) -> anyhow::Result<Value> {
        if data.iter().all(Value::is_i64) {
            let mut total: i64 = 0;
            for item in data {
                let n = item.as_i64().context("integer expected")?;
                total = total.checked_add(n).context("integer sum overflows")?;
            }
            return Ok(json!(total));
        }
        Ok(json!(data.iter().filter_map(Value::as_f64).sum::<f64>()))
    }
}

#[async_trait]
impl TaskProcessor for DataProcessingProcessor {
    async fn process(&self, task: &Task) -> anyhow::Result<Payload> {
        let data = Self::numbers(task)?;
        let count = data.len();

        let result = match operation(task) {
            "sum" => Self::sum(&data)?,
            "average" => {
                if data.is_empty() {
                    json!(0)
                } else {
                    let total: f64 = data.iter().filter_map(Value::as_f64).sum();
                    json!(total / count as f64)
                }
            }
            "sort" => {
                let mut sorted = data;
                sorted.sort_by(|a, b| {
                    let (a, b) = (a.as_f64().unwrap_or(0.0), b.as_f64().unwrap_or(0.0));
                    a.partial_cmp(&b).unwrap_or(Ordering::Equal)
                });
                Value::Array(sorted)
            }
            other => bail!("Unknown data operation: {other}"),
        };

        Ok(into_payload(json!({ "result": result, "count": count })))
    }

    fn supported_task_types(&self) -> Vec<String> {
        vec!["data_processing".to_string()]
    }

    fn estimate_processing_time(&self, task: &Task) -> Duration {
        let size = task
            .payload
            .get("data")
            .and_then(Value::as_array)
            .map_or(0, Vec::len);
        Duration::from_secs_f64((size as f64 * 0.0001).max(0.1))
    }
}
