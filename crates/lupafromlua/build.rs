use std::env;
use std::path::PathBuf;
use std::process::Command;

/// Name of the compile-time constant read by `linker::PYTHON_LIBRT`
const LIBRT_ENV: &str = "LUPAFROMLUA_PYTHON_LIBRT";

fn main() {
    println!("cargo:rerun-if-env-changed=PYTHON_LIBRT");
    println!("cargo:rerun-if-env-changed=PYO3_PYTHON");

    // Only Unix-like targets dlopen the runtime; elsewhere it is linked normally.
    if env::var_os("CARGO_CFG_UNIX").is_none() {
        return;
    }

    let library = env::var("PYTHON_LIBRT")
        .ok()
        .filter(|name| !name.trim().is_empty())
        .or_else(query_python_library);

    match library {
        Some(name) => println!("cargo:rustc-env={}={}", LIBRT_ENV, name.trim()),
        None => panic!(
            "PYTHON_LIBRT must be set when building for a Unix-like target \
             (e.g. PYTHON_LIBRT=libpython3.12.so.1.0), and no Python interpreter \
             was found to derive it from"
        ),
    }
}

fn find_python() -> Option<PathBuf> {
    if let Ok(explicit) = env::var("PYO3_PYTHON") {
        return Some(PathBuf::from(explicit));
    }
    which::which("python3").or_else(|_| which::which("python")).ok()
}

/// Ask the interpreter pyo3 builds against for its shared library name
fn query_python_library() -> Option<String> {
    let python = find_python()?;
    let script = "import sysconfig; \
                  print(sysconfig.get_config_var('INSTSONAME') \
                  or sysconfig.get_config_var('LDLIBRARY') or '', end='')";
    let output = Command::new(python).args(["-c", script]).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let name = String::from_utf8(output.stdout).ok()?;
    // Static-only builds report `libpythonX.Y.a`, which cannot be dlopened.
    if name.is_empty() || name.ends_with(".a") {
        return None;
    }
    Some(name)
}
