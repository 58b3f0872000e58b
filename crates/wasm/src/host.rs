//! Host functions exposed to guest modules.
//!
//! Three import modules make up the guest-visible ABI:
//!
//! - `state`: store reads against bound input stores (addressed by index)
//!   and policy-checked writes against the module's own output store.
//!   Numeric payloads travel as canonical decimal text, matching the store's
//!   value encoding; `int64`/`float64` travel as native scalars.
//! - `logger.println`: appends to the per-instance log buffer, truncating
//!   once 128 KiB have accumulated.
//! - `env.output` / `env.register_panic`: mapper output capture and
//!   structured panic reporting.
//!
//! Host functions run synchronously on the guest's stack and never suspend
//! beyond a store mutex acquisition. Each one re-checks the abort flag on
//! entry so no guest-visible work happens after cancellation.

use crate::{error::PanicInfo, instance::HostContext, instance::MAX_LOG_BYTE_COUNT, WasmError};
use bigdecimal::BigDecimal;
use num_bigint::BigInt;
use std::{str::FromStr, sync::Arc};
use tributary_store::{Store, StoreError, StoreReader};
use wasmtime::{AsContext, AsContextMut, Caller, Engine, Extern, Linker};

type HostResult<T> = Result<T, wasmtime::Error>;

/// Builds the linker carrying the full host ABI.
pub(crate) fn linker(engine: &Engine) -> HostResult<Linker<HostContext>> {
    let mut linker = Linker::new(engine);
    register_env(&mut linker)?;
    register_logger(&mut linker)?;
    register_state_reads(&mut linker)?;
    register_state_writes(&mut linker)?;
    Ok(linker)
}

fn register_env(linker: &mut Linker<HostContext>) -> HostResult<()> {
    linker.func_wrap(
        "env",
        "output",
        |mut caller: Caller<'_, HostContext>, ptr: u32, len: u32| -> HostResult<()> {
            check_abort(&mut caller)?;
            let bytes = read_bytes(&mut caller, ptr, len)?;
            caller.data_mut().output = Some(bytes);
            Ok(())
        },
    )?;

    linker.func_wrap(
        "env",
        "register_panic",
        |mut caller: Caller<'_, HostContext>,
         msg_ptr: u32,
         msg_len: u32,
         file_ptr: u32,
         file_len: u32,
         line: u32,
         column: u32|
         -> HostResult<()> {
            let message = read_string(&mut caller, msg_ptr, msg_len)?;
            let file = read_string(&mut caller, file_ptr, file_len)?;
            caller.data_mut().panic = Some(PanicInfo { message, file, line, column });
            Ok(())
        },
    )?;
    Ok(())
}

fn register_logger(linker: &mut Linker<HostContext>) -> HostResult<()> {
    linker.func_wrap(
        "logger",
        "println",
        |mut caller: Caller<'_, HostContext>, ptr: u32, len: u32| -> HostResult<()> {
            check_abort(&mut caller)?;
            let line = read_string(&mut caller, ptr, len)?;
            let ctx = caller.data_mut();
            if ctx.logs_byte_count + len as u64 > MAX_LOG_BYTE_COUNT {
                ctx.logs_truncated = true;
                return Ok(());
            }
            ctx.logs_byte_count += len as u64;
            tracing::debug!(target: "wasm", module = %ctx.module_name, block = ctx.clock.number, "{line}");
            ctx.logs.push(line);
            Ok(())
        },
    )?;
    Ok(())
}

fn register_state_reads(linker: &mut Linker<HostContext>) -> HostResult<()> {
    linker.func_wrap(
        "state",
        "get_at",
        |mut caller: Caller<'_, HostContext>,
         store_idx: u32,
         ord: i64,
         key_ptr: u32,
         key_len: u32,
         output_ptr: u32|
         -> HostResult<u32> {
            check_abort(&mut caller)?;
            let key = read_string(&mut caller, key_ptr, key_len)?;
            let reader = input_store(&caller, store_idx)?;
            reply_read(&mut caller, output_ptr, reader.get_at(ord as u64, &key))
        },
    )?;

    linker.func_wrap(
        "state",
        "get_first",
        |mut caller: Caller<'_, HostContext>,
         store_idx: u32,
         key_ptr: u32,
         key_len: u32,
         output_ptr: u32|
         -> HostResult<u32> {
            check_abort(&mut caller)?;
            let key = read_string(&mut caller, key_ptr, key_len)?;
            let reader = input_store(&caller, store_idx)?;
            reply_read(&mut caller, output_ptr, reader.get_first(&key))
        },
    )?;

    linker.func_wrap(
        "state",
        "get_last",
        |mut caller: Caller<'_, HostContext>,
         store_idx: u32,
         key_ptr: u32,
         key_len: u32,
         output_ptr: u32|
         -> HostResult<u32> {
            check_abort(&mut caller)?;
            let key = read_string(&mut caller, key_ptr, key_len)?;
            let reader = input_store(&caller, store_idx)?;
            reply_read(&mut caller, output_ptr, reader.get_last(&key))
        },
    )?;
    Ok(())
}

fn register_state_writes(linker: &mut Linker<HostContext>) -> HostResult<()> {
    linker.func_wrap(
        "state",
        "set",
        |mut caller: Caller<'_, HostContext>,
         ord: i64,
         key_ptr: u32,
         key_len: u32,
         value_ptr: u32,
         value_len: u32|
         -> HostResult<()> {
            check_abort(&mut caller)?;
            let key = read_string(&mut caller, key_ptr, key_len)?;
            let value = read_bytes(&mut caller, value_ptr, value_len)?;
            with_output_store(&mut caller, |store| store.set(ord as u64, &key, value))
        },
    )?;

    linker.func_wrap(
        "state",
        "set_if_not_exists",
        |mut caller: Caller<'_, HostContext>,
         ord: i64,
         key_ptr: u32,
         key_len: u32,
         value_ptr: u32,
         value_len: u32|
         -> HostResult<()> {
            check_abort(&mut caller)?;
            let key = read_string(&mut caller, key_ptr, key_len)?;
            let value = read_bytes(&mut caller, value_ptr, value_len)?;
            with_output_store(&mut caller, |store| store.set_if_not_exists(ord as u64, &key, value))
        },
    )?;

    linker.func_wrap(
        "state",
        "append",
        |mut caller: Caller<'_, HostContext>,
         ord: i64,
         key_ptr: u32,
         key_len: u32,
         value_ptr: u32,
         value_len: u32|
         -> HostResult<()> {
            check_abort(&mut caller)?;
            let key = read_string(&mut caller, key_ptr, key_len)?;
            let value = read_bytes(&mut caller, value_ptr, value_len)?;
            with_output_store(&mut caller, |store| store.append(ord as u64, &key, &value))
        },
    )?;

    linker.func_wrap(
        "state",
        "delete_prefix",
        |mut caller: Caller<'_, HostContext>,
         ord: i64,
         prefix_ptr: u32,
         prefix_len: u32|
         -> HostResult<()> {
            check_abort(&mut caller)?;
            let prefix = read_string(&mut caller, prefix_ptr, prefix_len)?;
            with_output_store(&mut caller, |store| store.delete_prefix(ord as u64, &prefix))
        },
    )?;

    linker.func_wrap(
        "state",
        "add_int64",
        |mut caller: Caller<'_, HostContext>,
         ord: i64,
         key_ptr: u32,
         key_len: u32,
         value: i64|
         -> HostResult<()> {
            check_abort(&mut caller)?;
            let key = read_string(&mut caller, key_ptr, key_len)?;
            with_output_store(&mut caller, |store| store.sum_int64(ord as u64, &key, value))
        },
    )?;

    linker.func_wrap(
        "state",
        "add_bigint",
        |mut caller: Caller<'_, HostContext>,
         ord: i64,
         key_ptr: u32,
         key_len: u32,
         value_ptr: u32,
         value_len: u32|
         -> HostResult<()> {
            check_abort(&mut caller)?;
            let key = read_string(&mut caller, key_ptr, key_len)?;
            let value = read_bigint(&mut caller, value_ptr, value_len)?;
            with_output_store(&mut caller, |store| store.sum_bigint(ord as u64, &key, &value))
        },
    )?;

    linker.func_wrap(
        "state",
        "add_float64",
        |mut caller: Caller<'_, HostContext>,
         ord: i64,
         key_ptr: u32,
         key_len: u32,
         value: f64|
         -> HostResult<()> {
            check_abort(&mut caller)?;
            let key = read_string(&mut caller, key_ptr, key_len)?;
            with_output_store(&mut caller, |store| store.sum_float64(ord as u64, &key, value))
        },
    )?;

    linker.func_wrap(
        "state",
        "add_bigfloat",
        |mut caller: Caller<'_, HostContext>,
         ord: i64,
         key_ptr: u32,
         key_len: u32,
         value_ptr: u32,
         value_len: u32|
         -> HostResult<()> {
            check_abort(&mut caller)?;
            let key = read_string(&mut caller, key_ptr, key_len)?;
            let value = read_bigdecimal(&mut caller, value_ptr, value_len)?;
            with_output_store(&mut caller, |store| store.sum_bigfloat(ord as u64, &key, &value))
        },
    )?;

    linker.func_wrap(
        "state",
        "set_min_int64",
        |mut caller: Caller<'_, HostContext>,
         ord: i64,
         key_ptr: u32,
         key_len: u32,
         value: i64|
         -> HostResult<()> {
            check_abort(&mut caller)?;
            let key = read_string(&mut caller, key_ptr, key_len)?;
            with_output_store(&mut caller, |store| store.set_min_int64(ord as u64, &key, value))
        },
    )?;

    linker.func_wrap(
        "state",
        "set_min_bigint",
        |mut caller: Caller<'_, HostContext>,
         ord: i64,
         key_ptr: u32,
         key_len: u32,
         value_ptr: u32,
         value_len: u32|
         -> HostResult<()> {
            check_abort(&mut caller)?;
            let key = read_string(&mut caller, key_ptr, key_len)?;
            let value = read_bigint(&mut caller, value_ptr, value_len)?;
            with_output_store(&mut caller, |store| store.set_min_bigint(ord as u64, &key, &value))
        },
    )?;

    linker.func_wrap(
        "state",
        "set_min_float64",
        |mut caller: Caller<'_, HostContext>,
         ord: i64,
         key_ptr: u32,
         key_len: u32,
         value: f64|
         -> HostResult<()> {
            check_abort(&mut caller)?;
            let key = read_string(&mut caller, key_ptr, key_len)?;
            with_output_store(&mut caller, |store| store.set_min_float64(ord as u64, &key, value))
        },
    )?;

    linker.func_wrap(
        "state",
        "set_min_bigfloat",
        |mut caller: Caller<'_, HostContext>,
         ord: i64,
         key_ptr: u32,
         key_len: u32,
         value_ptr: u32,
         value_len: u32|
         -> HostResult<()> {
            check_abort(&mut caller)?;
            let key = read_string(&mut caller, key_ptr, key_len)?;
            let value = read_bigdecimal(&mut caller, value_ptr, value_len)?;
            with_output_store(&mut caller, |store| store.set_min_bigfloat(ord as u64, &key, &value))
        },
    )?;

    linker.func_wrap(
        "state",
        "set_max_int64",
        |mut caller: Caller<'_, HostContext>,
         ord: i64,
         key_ptr: u32,
         key_len: u32,
         value: i64|
         -> HostResult<()> {
            check_abort(&mut caller)?;
            let key = read_string(&mut caller, key_ptr, key_len)?;
            with_output_store(&mut caller, |store| store.set_max_int64(ord as u64, &key, value))
        },
    )?;

    linker.func_wrap(
        "state",
        "set_max_bigint",
        |mut caller: Caller<'_, HostContext>,
         ord: i64,
         key_ptr: u32,
         key_len: u32,
         value_ptr: u32,
         value_len: u32|
         -> HostResult<()> {
            check_abort(&mut caller)?;
            let key = read_string(&mut caller, key_ptr, key_len)?;
            let value = read_bigint(&mut caller, value_ptr, value_len)?;
            with_output_store(&mut caller, |store| store.set_max_bigint(ord as u64, &key, &value))
        },
    )?;

    linker.func_wrap(
        "state",
        "set_max_float64",
        |mut caller: Caller<'_, HostContext>,
         ord: i64,
         key_ptr: u32,
         key_len: u32,
         value: f64|
         -> HostResult<()> {
            check_abort(&mut caller)?;
            let key = read_string(&mut caller, key_ptr, key_len)?;
            with_output_store(&mut caller, |store| store.set_max_float64(ord as u64, &key, value))
        },
    )?;

    linker.func_wrap(
        "state",
        "set_max_bigfloat",
        |mut caller: Caller<'_, HostContext>,
         ord: i64,
         key_ptr: u32,
         key_len: u32,
         value_ptr: u32,
         value_len: u32|
         -> HostResult<()> {
            check_abort(&mut caller)?;
            let key = read_string(&mut caller, key_ptr, key_len)?;
            let value = read_bigdecimal(&mut caller, value_ptr, value_len)?;
            with_output_store(&mut caller, |store| store.set_max_bigfloat(ord as u64, &key, &value))
        },
    )?;
    Ok(())
}

// --- helpers ---------------------------------------------------------------

fn check_abort(caller: &mut Caller<'_, HostContext>) -> HostResult<()> {
    if caller.data().is_interrupted() {
        caller.data_mut().host_error = Some(WasmError::Cancelled);
        return Err(wasmtime::Error::msg("execution cancelled"));
    }
    Ok(())
}

fn memory_of(caller: &mut Caller<'_, HostContext>) -> HostResult<wasmtime::Memory> {
    caller
        .get_export("memory")
        .and_then(Extern::into_memory)
        .ok_or_else(|| wasmtime::Error::msg("guest does not export memory"))
}

fn read_bytes(caller: &mut Caller<'_, HostContext>, ptr: u32, len: u32) -> HostResult<Vec<u8>> {
    let memory = memory_of(caller)?;
    let mut buf = vec![0u8; len as usize];
    memory
        .read(caller.as_context(), ptr as usize, &mut buf)
        .map_err(|err| wasmtime::Error::msg(format!("reading {len} bytes at {ptr}: {err}")))?;
    Ok(buf)
}

fn read_string(caller: &mut Caller<'_, HostContext>, ptr: u32, len: u32) -> HostResult<String> {
    String::from_utf8(read_bytes(caller, ptr, len)?)
        .map_err(|err| wasmtime::Error::msg(format!("guest string is not utf-8: {err}")))
}

fn read_bigint(caller: &mut Caller<'_, HostContext>, ptr: u32, len: u32) -> HostResult<BigInt> {
    let text = read_string(caller, ptr, len)?;
    BigInt::from_str(&text)
        .map_err(|err| wasmtime::Error::msg(format!("invalid bigint payload {text:?}: {err}")))
}

fn read_bigdecimal(
    caller: &mut Caller<'_, HostContext>,
    ptr: u32,
    len: u32,
) -> HostResult<BigDecimal> {
    let text = read_string(caller, ptr, len)?;
    BigDecimal::from_str(&text)
        .map_err(|err| wasmtime::Error::msg(format!("invalid bigfloat payload {text:?}: {err}")))
}

fn input_store(
    caller: &Caller<'_, HostContext>,
    idx: u32,
) -> HostResult<Arc<dyn StoreReader>> {
    caller
        .data()
        .input_stores
        .get(idx as usize)
        .cloned()
        .ok_or_else(|| wasmtime::Error::msg(format!("invalid input store index {idx}")))
}

/// Writes a found value back to the guest: the value is placed in freshly
/// `alloc`ed guest memory (ownership passes to the guest) and its
/// `(ptr, len)` pair is stored little-endian at `output_ptr`.
fn reply_read(
    caller: &mut Caller<'_, HostContext>,
    output_ptr: u32,
    value: Option<Vec<u8>>,
) -> HostResult<u32> {
    let Some(value) = value else { return Ok(0) };

    let alloc = caller
        .get_export("alloc")
        .and_then(Extern::into_func)
        .ok_or_else(|| wasmtime::Error::msg("guest does not export alloc"))?
        .typed::<u32, u32>(caller.as_context())?;
    let value_ptr = alloc.call(caller.as_context_mut(), value.len() as u32)?;

    let memory = memory_of(caller)?;
    memory
        .write(caller.as_context_mut(), value_ptr as usize, &value)
        .map_err(|err| wasmtime::Error::msg(format!("writing value at {value_ptr}: {err}")))?;

    let mut pair = [0u8; 8];
    pair[..4].copy_from_slice(&value_ptr.to_le_bytes());
    pair[4..].copy_from_slice(&(value.len() as u32).to_le_bytes());
    memory
        .write(caller.as_context_mut(), output_ptr as usize, &pair)
        .map_err(|err| wasmtime::Error::msg(format!("writing response at {output_ptr}: {err}")))?;
    Ok(1)
}

fn with_output_store(
    caller: &mut Caller<'_, HostContext>,
    op: impl FnOnce(&mut Store) -> Result<(), StoreError>,
) -> HostResult<()> {
    let Some(handle) = caller.data().output_store.clone() else {
        return Err(wasmtime::Error::msg("module has no writable store"));
    };
    if let Err(err) = op(&mut handle.write()) {
        let message = err.to_string();
        caller.data_mut().host_error = Some(WasmError::Store(err));
        return Err(wasmtime::Error::msg(message));
    }
    Ok(())
}
