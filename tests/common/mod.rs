//! Shared helpers: a tiny class-file writer, unit scaffolding and fake tools.

#![allow(dead_code)]

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use cs3_packager::{
    AnalyzerOutput, DexConverter, DexRequest, Error, LinkRequest, ModuleAnalyzer,
    ResourceCompiler, Result, Toolchain, DEFAULT_PLUGIN_MARKER,
};

/// Minimal class file for `name` carrying the given runtime-visible
/// annotation descriptors.
pub fn class_bytes(name: &str, annotations: &[&str]) -> Vec<u8> {
    let mut pool: Vec<u8> = Vec::new();
    let mut count: u16 = 0;
    let mut utf8 = |pool: &mut Vec<u8>, s: &str| -> u16 {
        pool.push(1);
        pool.extend_from_slice(&(s.len() as u16).to_be_bytes());
        pool.extend_from_slice(s.as_bytes());
        count += 1;
        count
    };

    let this_name = utf8(&mut pool, name);
    let super_name = utf8(&mut pool, "java/lang/Object");
    let attr_name = utf8(&mut pool, "RuntimeVisibleAnnotations");
    let type_indexes: Vec<u16> = annotations.iter().map(|a| utf8(&mut pool, *a)).collect();

    // Class entries follow the utf8 entries they point at.
    let this_class = count + 1;
    pool.push(7);
    pool.extend_from_slice(&this_name.to_be_bytes());
    let super_class = count + 2;
    pool.push(7);
    pool.extend_from_slice(&super_name.to_be_bytes());
    let pool_count = count + 2;

    let mut out = Vec::new();
    out.extend_from_slice(&0xCAFEBABEu32.to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes());
    out.extend_from_slice(&52u16.to_be_bytes());
    out.extend_from_slice(&(pool_count + 1).to_be_bytes());
    out.extend_from_slice(&pool);
    out.extend_from_slice(&0x0021u16.to_be_bytes());
    out.extend_from_slice(&this_class.to_be_bytes());
    out.extend_from_slice(&super_class.to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes()); // interfaces
    out.extend_from_slice(&0u16.to_be_bytes()); // fields
    out.extend_from_slice(&0u16.to_be_bytes()); // methods

    if type_indexes.is_empty() {
        out.extend_from_slice(&0u16.to_be_bytes());
    } else {
        let mut body = Vec::new();
        body.extend_from_slice(&(type_indexes.len() as u16).to_be_bytes());
        for index in &type_indexes {
            body.extend_from_slice(&index.to_be_bytes());
            body.extend_from_slice(&0u16.to_be_bytes());
        }
        out.extend_from_slice(&1u16.to_be_bytes());
        out.extend_from_slice(&attr_name.to_be_bytes());
        out.extend_from_slice(&(body.len() as u32).to_be_bytes());
        out.extend_from_slice(&body);
    }
    out
}

/// Write `<unit>/classes/<name>.class`.
pub fn write_class(unit_dir: &Path, name: &str, marked: bool) {
    let path = unit_dir.join("classes").join(format!("{}.class", name));
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let annotations: &[&str] = if marked { &[DEFAULT_PLUGIN_MARKER] } else { &[] };
    fs::write(path, class_bytes(name, annotations)).unwrap();
}

/// Write a `cs3.toml` with the given extra `[plugin]` lines.
pub fn write_unit(dir: &Path, plugin: &str) -> PathBuf {
    fs::create_dir_all(dir).unwrap();
    fs::write(
        dir.join("cs3.toml"),
        format!(
            r#"
[plugin]
version = 1
description = "Test unit"
authors = ["tester"]
{plugin}

[build]
class_dirs = ["classes"]
linked_jar = "full.jar"

[android]
compile_sdk = 34
min_sdk = 21
sdk_dir = "sdk"
"#
        ),
    )
    .unwrap();
    dir.to_path_buf()
}

/// Write a small zip file with the given entries.
pub fn write_zip(path: &Path, entries: &[(&str, &str)]) {
    let mut zip = zip::ZipWriter::new(fs::File::create(path).unwrap());
    let options = zip::write::SimpleFileOptions::default();
    for (name, bytes) in entries {
        zip.start_file(*name, options).unwrap();
        zip.write_all(bytes.as_bytes()).unwrap();
    }
    zip.finish().unwrap();
}

/// Entry names and contents of a zip archive, in order.
pub fn read_zip(path: &Path) -> Vec<(String, Vec<u8>)> {
    use std::io::Read;
    let mut archive = zip::ZipArchive::new(fs::File::open(path).unwrap()).unwrap();
    (0..archive.len())
        .map(|i| {
            let mut entry = archive.by_index(i).unwrap();
            let mut bytes = Vec::new();
            entry.read_to_end(&mut bytes).unwrap();
            (entry.name().to_string(), bytes)
        })
        .collect()
}

/// Converter that writes a placeholder dex and records each request.
#[derive(Debug, Default)]
pub struct FakeConverter {
    pub requests: Mutex<Vec<DexRequest>>,
    pub fail: bool,
}

impl DexConverter for FakeConverter {
    fn convert(&self, request: &DexRequest) -> Result<()> {
        self.requests.lock().push(request.clone());
        if self.fail {
            return Err(Error::Conversion("fake converter failure".to_string()));
        }
        let dex = request.output_dir.join("classes.dex");
        fs::write(&dex, format!("dex\n035 min-api={}", request.min_api))
            .map_err(|e| Error::io(&dex, e))
    }
}

/// Analyzer returning a fixed report.
#[derive(Debug)]
pub struct FakeAnalyzer {
    pub report: String,
    pub calls: Mutex<usize>,
}

impl FakeAnalyzer {
    pub fn new(report: &str) -> Self {
        Self {
            report: report.to_string(),
            calls: Mutex::new(0),
        }
    }
}

impl ModuleAnalyzer for FakeAnalyzer {
    fn analyze(&self, _jar: &Path) -> Result<AnalyzerOutput> {
        *self.calls.lock() += 1;
        Ok(AnalyzerOutput {
            report: self.report.clone(),
            exit_code: Some(0),
        })
    }
}

/// Resource compiler that links a small apk with a manifest and a table.
#[derive(Debug, Default)]
pub struct FakeResources;

impl ResourceCompiler for FakeResources {
    fn compile(&self, _res_dir: &Path, output: &Path) -> Result<()> {
        fs::write(output, b"flat").map_err(|e| Error::io(output, e))
    }

    fn link(&self, request: &LinkRequest) -> Result<()> {
        write_zip(
            &request.output,
            &[
                ("AndroidManifest.xml", "<manifest/>"),
                ("resources.arsc", "arsc"),
                ("res/drawable/icon.png", "png"),
            ],
        );
        Ok(())
    }
}

/// Fakes bundled as a toolchain, with handles kept for assertions.
pub struct Fakes {
    pub converter: Arc<FakeConverter>,
    pub analyzer: Arc<FakeAnalyzer>,
    pub toolchain: Toolchain,
}

pub fn fakes(report: &str) -> Fakes {
    fakes_with(FakeConverter::default(), report)
}

pub fn fakes_with(converter: FakeConverter, report: &str) -> Fakes {
    let converter = Arc::new(converter);
    let analyzer = Arc::new(FakeAnalyzer::new(report));
    let toolchain = Toolchain::new(
        converter.clone(),
        analyzer.clone(),
        Arc::new(FakeResources),
    );
    Fakes {
        converter,
        analyzer,
        toolchain,
    }
}
