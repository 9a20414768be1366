// Link flags for the Vowpal Wabbit C wrapper, only with the `vw` feature
use std::env;

fn main() {
    println!("cargo:rerun-if-env-changed=VW_LIB_DIR");

    if env::var_os("CARGO_FEATURE_VW").is_none() {
        return;
    }

    let lib_dir = env::var("VW_LIB_DIR").unwrap_or_else(|_| "/usr/local/lib".to_string());
    println!("cargo:rustc-link-search=native={}", lib_dir);

    for lib in ["vw_c_wrapper", "vw", "allreduce"] {
        println!("cargo:rustc-link-lib=static={}", lib);
    }
    println!("cargo:rustc-link-lib=dylib=boost_program_options");
    println!("cargo:rustc-link-lib=dylib=z");

    let cxx = if env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("macos") {
        "c++"
    } else {
        "stdc++"
    };
    println!("cargo:rustc-link-lib=dylib={}", cxx);
}
