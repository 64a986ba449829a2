use assert_cmd::prelude::*;
use predicates::str::contains;
use std::io::Write;
use std::process::Command;
use tempfile::{Builder, NamedTempFile};

fn write_temp(suffix: &str, contents: &str) -> NamedTempFile {
    let mut tmp = Builder::new()
        .suffix(suffix)
        .tempfile()
        .expect("temp project");
    tmp.write_all(contents.as_bytes()).expect("write project");
    tmp
}

#[test]
fn cli_runs_a_named_scene_and_prints_final_state() {
    let script = write_temp(
        ".lua",
        r#"
MyScene = {}
function MyScene:create()
  self.add:rectangle(400, 300, 100, 100, 0x00d4ff)
end
"#,
    );
    let mut cmd = Command::cargo_bin("gamecrafter-sandbox").expect("binary exists");
    cmd.arg(script.path()).arg("--run-ms").arg("50");
    cmd.assert()
        .success()
        .stdout(contains("Scene: named (MyScene)"))
        .stdout(contains("World bounds: 800x600"))
        .stdout(contains(
            " - #1 rectangle pos=(400.00, 300.00) size=(100, 100) color=#00d4ff",
        ))
        .stdout(contains("Script faults: 0"))
        .stdout(contains("Status: initialized"))
        .stdout(contains("Status: paused"))
        .stdout(contains("Status: destroyed"))
        .stdout(contains("Live canvas bindings: 0"));
}

#[test]
fn cli_survives_a_throwing_script() {
    let script = write_temp(".lua", "error('boom')");
    let mut cmd = Command::cargo_bin("gamecrafter-sandbox").expect("binary exists");
    cmd.arg(script.path()).arg("--run-ms").arg("10");
    cmd.assert()
        .success()
        .stdout(contains("Scene: wrapped"))
        .stdout(contains("Script faults: 1"))
        .stdout(contains("boom"));
}

#[test]
fn cli_loads_xml_projects() {
    let project = write_temp(
        ".xml",
        r##"<project>
  <name>Label</name>
  <config><canvas>preview</canvas><background>#000</background></config>
  <script><![CDATA[self.add:text(10, 20, "hi", { color = "#ff0000" })]]></script>
</project>
"##,
    );
    let mut cmd = Command::cargo_bin("gamecrafter-sandbox").expect("binary exists");
    cmd.arg(project.path()).arg("--run-ms").arg("10");
    cmd.assert()
        .success()
        .stdout(contains("Loaded project \"Label\""))
        .stdout(contains("World bounds: 800x600"))
        .stdout(contains(" - #1 text pos=(10.00, 20.00)"))
        .stdout(contains("color=#ff0000"));
}

#[test]
fn cli_rejects_unknown_flags() {
    let script = write_temp(".lua", "");
    let mut cmd = Command::cargo_bin("gamecrafter-sandbox").expect("binary exists");
    cmd.arg(script.path()).arg("--fast");
    cmd.assert()
        .failure()
        .stderr(contains("Unknown argument: --fast"));
}
