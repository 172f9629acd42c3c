use crate::errors::{WorkletError, WorkletResult};
use std::fmt;
use std::sync::Arc;
use wasmtime::{Config, Engine, Instance, Module, Store};

/// Compiled `biddingWasmHelperURL` module exposed to generateBid.
///
/// Every call gets a fresh instance with its own fuel budget, and NaNs are
/// canonicalized, so the same inputs always produce the same bid.
#[derive(Clone)]
pub struct WasmHelper {
    engine: Engine,
    module: Module,
    source: Arc<[u8]>,
    fuel: u64,
}

impl WasmHelper {
    /// Compile a module from binary or text format
    pub fn compile(source: Arc<[u8]>, fuel: u64) -> WorkletResult<Self> {
        let mut config = Config::new();
        config.consume_fuel(true);
        config.cranelift_nan_canonicalization(true);
        let engine = Engine::new(&config).map_err(|e| WorkletError::Wasm(e.to_string()))?;
        let module = Module::new(&engine, &source).map_err(|e| WorkletError::Wasm(format!("compile: {}", e)))?;
        Ok(Self { engine, module, source, fuel })
    }

    /// Call an exported `(i32) -> i32` function
    pub fn call_i32(&self, export: &str, arg: i32) -> WorkletResult<i32> {
        let mut store = Store::new(&self.engine, ());
        store.set_fuel(self.fuel).map_err(|e| WorkletError::Wasm(e.to_string()))?;
        let instance = Instance::new(&mut store, &self.module, &[]).map_err(|e| WorkletError::Wasm(format!("instantiate: {}", e)))?;
        let func = instance
            .get_typed_func::<i32, i32>(&mut store, export)
            .map_err(|e| WorkletError::Wasm(format!("export {}: {}", export, e)))?;
        let result = func.call(&mut store, arg).map_err(|e| WorkletError::Wasm(format!("{}: {}", export, e)));
        if let Err(err) = &result {
            tracing::debug!(export, error = %err, "wasm helper trapped");
        }
        result
    }

    pub fn exports(&self) -> Vec<String> {
        self.module.exports().map(|e| e.name().to_string()).collect()
    }
}

impl fmt::Debug for WasmHelper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WasmHelper").field("bytes", &self.source.len()).field("fuel", &self.fuel).finish()
    }
}

impl PartialEq for WasmHelper {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source && self.fuel == other.fuel
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMES_FOUR: &str = r#"(module
        (func (export "compute") (param i32) (result i32)
            local.get 0
            i32.const 4
            i32.mul))"#;

    const SPIN: &str = r#"(module
        (func (export "compute") (param i32) (result i32)
            (loop $forever (br $forever))
            i32.const 0))"#;

    #[test]
    fn test_compute_export() {
        let helper = WasmHelper::compile(Arc::from(TIMES_FOUR.as_bytes()), 10_000).unwrap();
        assert_eq!(helper.call_i32("compute", 2).unwrap(), 8);
        assert_eq!(helper.exports(), vec!["compute".to_string()]);
    }

    #[test]
    fn test_missing_export_is_an_error() {
        let helper = WasmHelper::compile(Arc::from(TIMES_FOUR.as_bytes()), 10_000).unwrap();
        assert!(matches!(helper.call_i32("other", 2), Err(WorkletError::Wasm(_))));
    }

    #[test]
    fn test_fuel_bounds_runaway_helpers() {
        let helper = WasmHelper::compile(Arc::from(SPIN.as_bytes()), 10_000).unwrap();
        assert!(matches!(helper.call_i32("compute", 2), Err(WorkletError::Wasm(_))));
    }

    #[test]
    fn test_garbage_does_not_compile() {
        assert!(WasmHelper::compile(Arc::from(&b"not wasm"[..]), 10_000).is_err());
    }
}
