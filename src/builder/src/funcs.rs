//! The function library: script expressions that read state without
//! producing layers.
//!
//! Functions run outside the caching envelope and must not mutate image
//! state. `getuid`/`getgid`/`read` inspect the current container's
//! filesystem; `puts` writes to the build log.

use futures_util::future::BoxFuture;

use box_core::error::{BoxError, Result};

use crate::dispatch::{ArgSpec, Builder, FuncDef, FuncFn};
use crate::value::Value;

/// The function jump table installed into every builder.
pub fn table() -> Vec<(&'static str, FuncDef)> {
    vec![
        ("getuid", def(ArgSpec::exactly(1), getuid_fn)),
        ("getgid", def(ArgSpec::exactly(1), getgid_fn)),
        ("read", def(ArgSpec::exactly(1), read_fn)),
        ("puts", def(ArgSpec::at_least(0), puts_fn)),
    ]
}

fn def(spec: ArgSpec, call: FuncFn) -> FuncDef {
    FuncDef { spec, call }
}

/// `getuid("name")` — numeric uid from the container's `/etc/passwd`.
fn getuid_fn<'a>(b: &'a mut Builder, args: &'a [Value]) -> BoxFuture<'a, Result<Value>> {
    Box::pin(async move {
        let name = want_str("getuid", args)?;
        let passwd = read_container_file(b, "/etc/passwd").await?;
        let uid = lookup_id(&passwd, name)
            .ok_or_else(|| BoxError::Reader(format!("getuid: no such user {name:?}")))?;
        Ok(Value::Int(uid))
    })
}

/// `getgid("name")` — numeric gid from the container's `/etc/group`.
fn getgid_fn<'a>(b: &'a mut Builder, args: &'a [Value]) -> BoxFuture<'a, Result<Value>> {
    Box::pin(async move {
        let name = want_str("getgid", args)?;
        let group = read_container_file(b, "/etc/group").await?;
        let gid = lookup_id(&group, name)
            .ok_or_else(|| BoxError::Reader(format!("getgid: no such group {name:?}")))?;
        Ok(Value::Int(gid))
    })
}

/// `read("/path")` — file contents from inside the current container.
fn read_fn<'a>(b: &'a mut Builder, args: &'a [Value]) -> BoxFuture<'a, Result<Value>> {
    Box::pin(async move {
        let path = want_str("read", args)?;
        let contents = read_container_file(b, path).await?;
        Ok(Value::Str(contents))
    })
}

/// `puts(...)` — print arguments to the build log; returns nil.
fn puts_fn<'a>(b: &'a mut Builder, args: &'a [Value]) -> BoxFuture<'a, Result<Value>> {
    Box::pin(async move {
        let text = args
            .iter()
            .map(Value::display)
            .collect::<Vec<_>>()
            .join(" ");
        b.log().message(&text);
        Ok(Value::Nil)
    })
}

async fn read_container_file(b: &mut Builder, path: &str) -> Result<String> {
    let bytes = b
        .exec
        .read_file(path)
        .await
        .map_err(|e| BoxError::Reader(format!("read {path}: {e}")))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn want_str<'v>(name: &str, args: &'v [Value]) -> Result<&'v str> {
    args.first()
        .and_then(Value::as_str)
        .ok_or_else(|| BoxError::argument(name, "argument must be a string"))
}

/// Resolve a name in passwd/group-style tables. Both keep their numeric id
/// in the third `:`-separated field.
fn lookup_id(table: &str, name: &str) -> Option<i64> {
    for line in table.lines() {
        let mut fields = line.split(':');
        if fields.next() != Some(name) {
            continue;
        }
        return fields.nth(1).and_then(|id| id.parse().ok());
    }
    None
}
