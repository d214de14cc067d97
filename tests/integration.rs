//! Integration tests for cs3-packager.

mod common;

use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use cs3_packager::{
    ArchiveRecord, BuildEvent, Error, PackagerConfig, PackagingSession, PluginManifest, Stage,
    StageState, DEX_ENTRY, MANIFEST_ENTRY,
};

use common::{fakes, fakes_with, read_zip, write_class, write_unit, FakeConverter};

fn session(root: &std::path::Path, report: &str) -> (PackagingSession, common::Fakes) {
    let fakes = fakes(report);
    let session =
        PackagingSession::new(root, PackagerConfig::default()).with_toolchain(fakes.toolchain.clone());
    (session, fakes)
}

fn archived_manifest(archive: &std::path::Path) -> (String, PluginManifest) {
    let entries = read_zip(archive);
    let (_, bytes) = entries
        .iter()
        .find(|(name, _)| name == MANIFEST_ENTRY)
        .expect("archive has a manifest");
    let json = String::from_utf8(bytes.clone()).unwrap();
    let manifest = PluginManifest::from_json(&json).unwrap();
    (json, manifest)
}

#[test]
fn test_end_to_end_without_marker() {
    let root = tempfile::tempdir().unwrap();
    let unit = write_unit(&root.path().join("Plain"), "");
    write_class(&unit, "com/example/Helper", false);

    let (session, _fakes) = session(root.path(), "");
    let report = session.run(&[unit.clone()]).unwrap();

    assert!(report.success());
    let unit_report = report.unit("Plain").unwrap();
    assert_eq!(unit_report.state(Stage::CompileDex), Some(StageState::Executed));
    assert_eq!(unit_report.entry_class, None);
    assert_eq!(
        fs::read_to_string(unit.join("build/intermediates/pluginClass")).unwrap(),
        ""
    );

    let archive = unit_report.archive.clone().unwrap();
    assert_eq!(archive, unit.join("build/Plain.cs3"));
    let (json, manifest) = archived_manifest(&archive);
    assert!(!json.contains("pluginClassName"));
    assert!(!json.contains("null"));
    assert_eq!(manifest.name, "Plain");
    assert_eq!(manifest.authors, vec!["tester"]);
}

#[test]
fn test_end_to_end_with_marker() {
    let root = tempfile::tempdir().unwrap();
    let unit = write_unit(&root.path().join("Marked"), "");
    write_class(&unit, "com/example/Helper", false);
    write_class(&unit, "com/example/provider/MyPlugin", true);

    let (session, _fakes) = session(root.path(), "");
    let report = session.run(&[unit.clone()]).unwrap();
    assert!(report.success());

    let side_channel = fs::read(unit.join("build/intermediates/pluginClass")).unwrap();
    assert_eq!(side_channel, b"com.example.provider.MyPlugin");

    let archive = unit.join("build/Marked.cs3");
    let names: Vec<String> = read_zip(&archive).into_iter().map(|(n, _)| n).collect();
    assert_eq!(names, vec![MANIFEST_ENTRY, DEX_ENTRY]);

    let (_, manifest) = archived_manifest(&archive);
    assert_eq!(
        manifest.plugin_class_name.as_deref(),
        Some("com.example.provider.MyPlugin")
    );
    assert_eq!(manifest.min_sdk, Some(21));
    assert_eq!(manifest.compile_sdk.as_deref(), Some("android-34"));

    let index = fs::read_to_string(root.path().join("build/plugins.json")).unwrap();
    let records: Vec<ArchiveRecord> = serde_json::from_str(&index).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].internal_name, "Marked");
    assert_eq!(records[0].path, "Marked/build/Marked.cs3");
    assert_eq!(
        records[0].file_size,
        Some(fs::metadata(&archive).unwrap().len())
    );
}

#[test]
fn test_multiple_markers_fail_without_touching_side_channel() {
    let root = tempfile::tempdir().unwrap();
    let broken = write_unit(&root.path().join("Broken"), "");
    write_class(&broken, "com/example/One", true);
    write_class(&broken, "com/example/Two", true);
    let side_channel = broken.join("build/intermediates/pluginClass");
    fs::create_dir_all(side_channel.parent().unwrap()).unwrap();
    fs::write(&side_channel, "com.example.Previous").unwrap();

    let healthy = write_unit(&root.path().join("Healthy"), "");
    write_class(&healthy, "com/example/Healthy", true);

    let (session, _fakes) = session(root.path(), "");
    let report = session.run(&[broken.clone(), healthy.clone()]).unwrap();

    assert!(!report.success());
    let broken_report = report.unit("Broken").unwrap();
    assert_eq!(broken_report.state(Stage::CompileDex), Some(StageState::Failed));
    for stage in [Stage::CompilePluginJar, Stage::Manifest, Stage::Make, Stage::Register] {
        assert_eq!(broken_report.state(stage), Some(StageState::Blocked), "{}", stage);
    }
    match broken_report.first_error() {
        Some(Error::MultiplePluginClasses { first, second }) => {
            assert_eq!(first, "com.example.One");
            assert_eq!(second, "com.example.Two");
        }
        other => panic!("expected multiplicity error, got {:?}", other),
    }
    assert!(!broken.join("build/intermediates/classes.dex").exists());
    assert_eq!(fs::read_to_string(&side_channel).unwrap(), "com.example.Previous");
    assert!(!broken.join("build/Broken.cs3").exists());

    // The sibling unit is unaffected.
    assert!(report.unit("Healthy").unwrap().success());
    assert_eq!(report.records, 1);
    assert!(session.registry().contains("Healthy"));
    assert!(!session.registry().contains("Broken"));
}

#[test]
fn test_side_channel_feeds_manifest_when_compile_is_up_to_date() {
    let root = tempfile::tempdir().unwrap();
    let unit = write_unit(&root.path().join("Cached"), "");
    write_class(&unit, "com/example/Cached", true);

    let (session, fakes) = session(root.path(), "");
    assert!(session.run(&[unit.clone()]).unwrap().success());
    fs::remove_file(unit.join("build/intermediates/manifest.json")).unwrap();

    let second = PackagingSession::new(root.path(), PackagerConfig::default())
        .with_toolchain(fakes.toolchain.clone());
    let report = second.run(&[unit.clone()]).unwrap();
    let unit_report = report.unit("Cached").unwrap();

    assert_eq!(unit_report.state(Stage::CompileDex), Some(StageState::UpToDate));
    assert_eq!(fakes.converter.requests.lock().len(), 1);

    let persisted = fs::read_to_string(unit.join("build/intermediates/pluginClass")).unwrap();
    assert_eq!(unit_report.entry_class.as_deref(), Some(persisted.as_str()));

    let (_, manifest) = archived_manifest(&unit.join("build/Cached.cs3"));
    assert_eq!(manifest.plugin_class_name.as_deref(), Some(persisted.as_str()));
}

#[test]
fn test_deleted_side_channel_reruns_compile() {
    let root = tempfile::tempdir().unwrap();
    let unit = write_unit(&root.path().join("Rescan"), "");
    write_class(&unit, "com/example/Rescan", true);

    let (session, fakes) = session(root.path(), "");
    assert!(session.run(&[unit.clone()]).unwrap().success());
    let side_channel = unit.join("build/intermediates/pluginClass");
    fs::remove_file(&side_channel).unwrap();

    let second = PackagingSession::new(root.path(), PackagerConfig::default())
        .with_toolchain(fakes.toolchain.clone());
    let report = second.run(&[unit.clone()]).unwrap();
    let unit_report = report.unit("Rescan").unwrap();

    assert_eq!(unit_report.state(Stage::CompileDex), Some(StageState::Executed));
    assert_eq!(fakes.converter.requests.lock().len(), 2);
    assert_eq!(fs::read_to_string(&side_channel).unwrap(), "com.example.Rescan");

    let (_, manifest) = archived_manifest(&unit.join("build/Rescan.cs3"));
    assert_eq!(manifest.plugin_class_name.as_deref(), Some("com.example.Rescan"));
}

#[test]
fn test_unmarked_rebuild_clears_stale_side_channel() {
    let root = tempfile::tempdir().unwrap();
    let unit = write_unit(&root.path().join("Changing"), "");
    write_class(&unit, "com/example/Entry", true);

    let (session, fakes) = session(root.path(), "");
    assert!(session.run(&[unit.clone()]).unwrap().success());
    assert!(unit.join("build/intermediates/pluginClass").exists());

    write_class(&unit, "com/example/Entry", false);
    let second = PackagingSession::new(root.path(), PackagerConfig::default())
        .with_toolchain(fakes.toolchain.clone());
    assert!(second.run(&[unit.clone()]).unwrap().success());

    assert_eq!(
        fs::read_to_string(unit.join("build/intermediates/pluginClass")).unwrap(),
        ""
    );
    let (json, _) = archived_manifest(&unit.join("build/Changing.cs3"));
    assert!(!json.contains("pluginClassName"));
}

#[test]
fn test_converter_request_contract() {
    let root = tempfile::tempdir().unwrap();
    let unit = write_unit(&root.path().join("Request"), "");
    write_class(&unit, "com/example/Request", true);

    let (session, fakes) = session(root.path(), "");
    session.run(&[unit.clone()]).unwrap();

    let requests = fakes.converter.requests.lock();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert!(request.desugaring);
    assert!(request.classpath.is_empty());
    assert_eq!(request.min_api, 21);
    assert_eq!(request.inputs, vec![unit.join("classes")]);
    assert_eq!(
        request.boot_classpath,
        vec![unit.join("sdk/platforms/android-34/android.jar")]
    );
    assert_eq!(request.output_dir, unit.join("build/intermediates"));
}

#[test]
fn test_converter_failure_blocks_dependents() {
    let root = tempfile::tempdir().unwrap();
    let unit = write_unit(&root.path().join("Crash"), "");
    write_class(&unit, "com/example/Crash", true);

    let fakes = fakes_with(
        FakeConverter {
            fail: true,
            ..Default::default()
        },
        "",
    );
    let session = PackagingSession::new(root.path(), PackagerConfig::default())
        .with_toolchain(fakes.toolchain.clone());
    let report = session.run(&[unit.clone()]).unwrap();

    let unit_report = report.unit("Crash").unwrap();
    assert_eq!(unit_report.state(Stage::CompileDex), Some(StageState::Failed));
    assert_eq!(unit_report.state(Stage::Make), Some(StageState::Blocked));
    assert!(matches!(unit_report.first_error(), Some(Error::Conversion(_))));
    assert_eq!(fakes.converter.requests.lock().len(), 1);
    assert_eq!(report.records, 0);
}

#[test]
fn test_no_class_inputs() {
    let root = tempfile::tempdir().unwrap();
    let unit = write_unit(&root.path().join("Empty"), "");

    let (session, fakes) = session(root.path(), "");
    let report = session.run(&[unit.clone()]).unwrap();

    let unit_report = report.unit("Empty").unwrap();
    assert!(unit_report.success());
    assert_eq!(unit_report.state(Stage::CompileDex), Some(StageState::NoSource));
    assert!(fakes.converter.requests.lock().is_empty());

    let names: Vec<String> = read_zip(&unit.join("build/Empty.cs3"))
        .into_iter()
        .map(|(n, _)| n)
        .collect();
    assert_eq!(names, vec![MANIFEST_ENTRY]);
}

#[test]
fn test_cross_platform_disabled_touches_nothing() {
    let root = tempfile::tempdir().unwrap();
    let unit = write_unit(&root.path().join("Local"), "");
    write_class(&unit, "com/example/Local", true);
    fs::write(unit.join("full.jar"), b"jar").unwrap();

    let (session, fakes) = session(root.path(), "android.jar");
    let report = session.run(&[unit.clone()]).unwrap();

    let unit_report = report.unit("Local").unwrap();
    assert!(unit_report.success());
    assert_eq!(unit_report.state(Stage::CompilePluginJar), Some(StageState::Skipped));
    assert_eq!(
        unit_report.state(Stage::EnsureJarCompatibility),
        Some(StageState::Skipped)
    );
    assert_eq!(*fakes.analyzer.calls.lock(), 0);
    assert!(!unit.join("build/Local.jar").exists());
    assert!(!unit.join("build/jdeps-output.txt").exists());
}

#[test]
fn test_cross_platform_forbidden_imports() {
    let root = tempfile::tempdir().unwrap();
    let unit = write_unit(&root.path().join("Leaky"), "cross_platform = true");
    write_class(&unit, "com/example/Leaky", true);
    fs::write(unit.join("full.jar"), b"jar-bytes").unwrap();

    let (session, _fakes) = session(root.path(), "java.base,android.jar\n");
    let report = session.run(&[unit.clone()]).unwrap();

    let unit_report = report.unit("Leaky").unwrap();
    assert_eq!(unit_report.state(Stage::CompilePluginJar), Some(StageState::Executed));
    assert_eq!(
        unit_report.state(Stage::EnsureJarCompatibility),
        Some(StageState::Failed)
    );
    assert_eq!(unit_report.state(Stage::Manifest), Some(StageState::Executed));
    assert_eq!(unit_report.state(Stage::Make), Some(StageState::Blocked));
    assert!(matches!(
        unit_report.first_error(),
        Some(Error::ForbiddenImports { .. })
    ));
    assert_eq!(
        fs::read_to_string(unit.join("build/jdeps-output.txt")).unwrap(),
        "java.base,android.jar\n"
    );
}

#[test]
fn test_cross_platform_clean_and_idempotent() {
    let root = tempfile::tempdir().unwrap();
    let unit = write_unit(&root.path().join("Portable"), "cross_platform = true");
    write_class(&unit, "com/example/Portable", true);
    fs::write(unit.join("full.jar"), b"portable-jar").unwrap();

    let (session, fakes) = session(root.path(), "java.base,java.net.http");
    let report = session.run(&[unit.clone()]).unwrap();
    assert!(report.success());

    let target = unit.join("build/Portable.jar");
    let first = fs::read(&target).unwrap();
    assert_eq!(first, b"portable-jar");

    let rerun = PackagingSession::new(root.path(), PackagerConfig::default().with_rerun_tasks(true))
        .with_toolchain(fakes.toolchain.clone());
    let report = rerun.run(&[unit.clone()]).unwrap();
    assert_eq!(
        report.unit("Portable").unwrap().state(Stage::CompilePluginJar),
        Some(StageState::Executed)
    );
    assert_eq!(fs::read(&target).unwrap(), first);

    let records: Vec<ArchiveRecord> =
        serde_json::from_str(&fs::read_to_string(&report.index).unwrap()).unwrap();
    assert_eq!(records[0].jar_file_size, Some(first.len() as u64));

    let (_, manifest) = archived_manifest(&unit.join("build/Portable.cs3"));
    assert!(manifest.is_cross_platform);
}

#[test]
fn test_cross_platform_empty_report_succeeds() {
    let root = tempfile::tempdir().unwrap();
    let unit = write_unit(&root.path().join("Quiet"), "cross_platform = true");
    write_class(&unit, "com/example/Quiet", true);
    fs::write(unit.join("full.jar"), b"jar").unwrap();

    let (session, fakes) = session(root.path(), "   \n");
    let report = session.run(&[unit.clone()]).unwrap();

    assert!(report.success());
    assert_eq!(*fakes.analyzer.calls.lock(), 1);
}

#[test]
fn test_resources_are_merged_without_android_manifest() {
    let root = tempfile::tempdir().unwrap();
    let unit = write_unit(&root.path().join("Styled"), "requires_resources = true");
    write_class(&unit, "com/example/Styled", true);
    fs::create_dir_all(unit.join("src/main/res/values")).unwrap();
    fs::write(unit.join("src/main/res/values/strings.xml"), "<resources/>").unwrap();

    let (session, _fakes) = session(root.path(), "");
    let report = session.run(&[unit.clone()]).unwrap();
    assert!(report.success());

    let names: Vec<String> = read_zip(&unit.join("build/Styled.cs3"))
        .into_iter()
        .map(|(n, _)| n)
        .collect();
    assert_eq!(
        names,
        vec![MANIFEST_ENTRY, DEX_ENTRY, "resources.arsc", "res/drawable/icon.png"]
    );

    let (_, manifest) = archived_manifest(&unit.join("build/Styled.cs3"));
    assert!(manifest.requires_resources);
}

#[test]
fn test_preflight_failure_runs_nothing() {
    let root = tempfile::tempdir().unwrap();
    let unit = root.path().join("Misconfigured");
    fs::create_dir_all(&unit).unwrap();
    fs::write(unit.join("cs3.toml"), "[plugin]\nversion = 1\n").unwrap();
    write_class(&unit, "com/example/Misconfigured", true);

    let (session, fakes) = session(root.path(), "");
    let report = session.run(&[unit.clone()]).unwrap();

    let unit_report = report.unit("Misconfigured").unwrap();
    assert!(!unit_report.success());
    assert!(unit_report.first_error().unwrap().is_configuration());
    assert!(unit_report
        .states
        .values()
        .all(|state| *state == StageState::Blocked));
    assert!(fakes.converter.requests.lock().is_empty());
    assert!(!unit.join("build").exists());
}

#[test]
fn test_legacy_layout_without_resource_dir_runs_nothing() {
    let root = tempfile::tempdir().unwrap();
    let unit = root.path().join("LegacyStyled");
    fs::create_dir_all(&unit).unwrap();
    fs::write(
        unit.join("cs3.toml"),
        r#"
[plugin]
version = 1
requires_resources = true

[build]
class_dirs = ["classes"]

[android]
compile_sdk_version = "android-34"
sdk_dir = "sdk"
"#,
    )
    .unwrap();
    write_class(&unit, "com/example/LegacyStyled", true);

    let (session, fakes) = session(root.path(), "");
    let report = session.run(&[unit.clone()]).unwrap();

    let unit_report = report.unit("LegacyStyled").unwrap();
    assert!(unit_report.first_error().unwrap().is_configuration());
    assert_eq!(unit_report.state(Stage::CompileDex), Some(StageState::Blocked));
    assert!(fakes.converter.requests.lock().is_empty());
    assert!(!unit.join("build").exists());
}

#[test]
fn test_malformed_unit_file_is_a_configuration_error() {
    let root = tempfile::tempdir().unwrap();
    let unit = root.path().join("Broken");
    fs::create_dir_all(&unit).unwrap();
    fs::write(unit.join("cs3.toml"), "[plugin\nversion = ").unwrap();

    let (session, fakes) = session(root.path(), "");
    let report = session.run(&[unit.clone()]).unwrap();

    let unit_report = report.unit("Broken").unwrap();
    let err = unit_report.first_error().unwrap();
    assert!(err.is_configuration());
    assert!(err.to_string().contains("cs3.toml"));
    assert!(fakes.converter.requests.lock().is_empty());
}

#[test]
fn test_required_entry_class() {
    let root = tempfile::tempdir().unwrap();
    let unit = write_unit(&root.path().join("Anonymous"), "");
    write_class(&unit, "com/example/Anonymous", false);

    let fakes = fakes("");
    let session = PackagingSession::new(
        root.path(),
        PackagerConfig::default().with_require_entry_class(true),
    )
    .with_toolchain(fakes.toolchain.clone());
    let report = session.run(&[unit.clone()]).unwrap();

    let unit_report = report.unit("Anonymous").unwrap();
    assert_eq!(unit_report.state(Stage::Manifest), Some(StageState::Failed));
    assert!(matches!(
        unit_report.first_error(),
        Some(Error::MissingEntryClass(_))
    ));
}

#[test]
fn test_up_to_date_and_rerun_tasks() {
    let root = tempfile::tempdir().unwrap();
    let unit = write_unit(&root.path().join("Incremental"), "");
    write_class(&unit, "com/example/Incremental", true);

    let (session, fakes) = session(root.path(), "");
    session.run(&[unit.clone()]).unwrap();

    let again = PackagingSession::new(root.path(), PackagerConfig::default())
        .with_toolchain(fakes.toolchain.clone());
    let report = again.run(&[unit.clone()]).unwrap();
    let unit_report = report.unit("Incremental").unwrap();
    assert_eq!(unit_report.state(Stage::CompileDex), Some(StageState::UpToDate));
    assert_eq!(unit_report.state(Stage::Manifest), Some(StageState::Executed));
    assert_eq!(unit_report.state(Stage::Make), Some(StageState::UpToDate));
    assert_eq!(unit_report.state(Stage::Register), Some(StageState::Executed));
    assert_eq!(report.records, 1);
    let incremental_stages = unit_report.stages_run();
    assert_eq!(incremental_stages, 2);

    let forced = PackagingSession::new(root.path(), PackagerConfig::default().with_rerun_tasks(true))
        .with_toolchain(fakes.toolchain.clone());
    let report = forced.run(&[unit.clone()]).unwrap();
    let unit_report = report.unit("Incremental").unwrap();
    assert_eq!(unit_report.state(Stage::CompileDex), Some(StageState::Executed));
    assert_eq!(unit_report.state(Stage::Make), Some(StageState::Executed));
    assert!(unit_report.stages_run() > incremental_stages);
    assert_eq!(fakes.converter.requests.lock().len(), 2);
}

#[test]
fn test_rebuilt_archive_is_byte_identical() {
    let root = tempfile::tempdir().unwrap();
    let unit = write_unit(&root.path().join("Stable"), "");
    write_class(&unit, "com/example/Stable", true);
    let archive = unit.join("build/Stable.cs3");

    let fakes = fakes("");
    let config = PackagerConfig::default().with_rerun_tasks(true);

    PackagingSession::new(root.path(), config.clone())
        .with_toolchain(fakes.toolchain.clone())
        .run(&[unit.clone()])
        .unwrap();
    let first = fs::read(&archive).unwrap();

    std::thread::sleep(std::time::Duration::from_millis(1100));
    PackagingSession::new(root.path(), config)
        .with_toolchain(fakes.toolchain.clone())
        .run(&[unit.clone()])
        .unwrap();
    assert_eq!(fs::read(&archive).unwrap(), first);
}

#[test]
fn test_run_all_discovers_units_and_emits_events() {
    let root = tempfile::tempdir().unwrap();
    for name in ["Alpha", "Beta", "Gamma"] {
        let unit = write_unit(&root.path().join(name), "");
        write_class(&unit, &format!("com/example/{}", name), true);
    }

    let (session, _fakes) = session(root.path(), "");
    let started = Arc::new(AtomicUsize::new(0));
    let indexes = Arc::new(AtomicUsize::new(0));
    {
        let started = started.clone();
        let indexes = indexes.clone();
        session.on_event(move |event| match event {
            BuildEvent::StageStarted { .. } => {
                started.fetch_add(1, Ordering::Relaxed);
            }
            BuildEvent::IndexWritten { records, .. } => {
                indexes.fetch_add(*records, Ordering::Relaxed);
            }
            _ => {}
        });
    }

    let report = session.run_all().unwrap();
    assert!(report.success());
    assert_eq!(report.units.len(), 3);
    assert_eq!(report.records, 3);
    assert_eq!(indexes.load(Ordering::Relaxed), 3);
    assert_eq!(started.load(Ordering::Relaxed), 3 * Stage::ALL.len());

    let records: Vec<ArchiveRecord> =
        serde_json::from_str(&fs::read_to_string(&report.index).unwrap()).unwrap();
    let names: Vec<&str> = records.iter().map(|r| r.internal_name.as_str()).collect();
    assert_eq!(names, vec!["Alpha", "Beta", "Gamma"]);
}
