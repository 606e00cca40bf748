use std::env;
use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-env-changed=FFMPEG_DIR");
    println!("cargo:rerun-if-env-changed=VCPKG_ROOT");
    println!("cargo:rerun-if-env-changed=VCPKGRS_TRIPLET");

    // Only the optional picture decoder links against FFmpeg.
    if env::var_os("CARGO_FEATURE_FFMPEG").is_none() {
        return;
    }

    let target_os = env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    if target_os != "windows" || env::var_os("FFMPEG_DIR").is_some() {
        return;
    }

    let Ok(vcpkg_root) = env::var("VCPKG_ROOT") else {
        println!(
            "cargo:warning=the `ffmpeg` feature needs FFmpeg development files. Set FFMPEG_DIR or install FFmpeg via vcpkg and set VCPKG_ROOT."
        );
        return;
    };

    let triplet = env::var("VCPKGRS_TRIPLET").unwrap_or_else(|_| "x64-windows".to_string());
    let ffmpeg_dir = PathBuf::from(&vcpkg_root).join("installed").join(&triplet);

    let note = if ffmpeg_dir.exists() {
        format!("using vcpkg FFmpeg under {}; export FFMPEG_DIR to pin it", ffmpeg_dir.display())
    } else {
        format!("no vcpkg FFmpeg under {}; picture decoding will not link", ffmpeg_dir.display())
    };
    println!("cargo:warning={note}");
}
