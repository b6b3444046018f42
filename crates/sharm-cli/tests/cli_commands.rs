use serde_json::Value;
use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn sharm(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_sharm"))
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("sharm should start")
}

fn path_arg(path: &Path) -> &str {
    path.to_str().expect("temp paths are UTF-8")
}

fn write_file(path: &Path, contents: &str) {
    fs::write(path, contents).expect("file should be written");
}

fn stdout_json(output: &Output) -> Value {
    serde_json::from_slice(&output.stdout).expect("stdout should hold JSON")
}

const MODEL_TBL: &str = "\
3 3.986004415e14 6378136.3
0 0 1.0 0.0
1 0 0.0 0.0
2 0 -4.8e-4 0.0
2 1 1.0e-6 -2.0e-6
2 2 2.4e-6 -1.4e-6
3 0 9.6e-7 0.0
3 1 2.0e-6 2.5e-7
3 2 9.0e-7 -6.2e-7
3 3 7.2e-7 1.4e-6
";

#[test]
fn info_reports_metadata() {
    let temp = TempDir::new().expect("tempdir should be created");
    let model = temp.path().join("model.tbl");
    write_file(&model, MODEL_TBL);

    let output = sharm(&["info", path_arg(&model)]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let report = stdout_json(&output);
    assert_eq!(report["nmax"], 3);
    assert_eq!(report["format"], "tbl");
    assert_eq!(report["r"], 6378136.3);
}

#[test]
fn info_reads_only_the_gfc_header() {
    let temp = TempDir::new().expect("tempdir should be created");
    let model = temp.path().join("model.gfc");
    write_file(
        &model,
        "\
product_type gravity_field
earth_gravity_constant 3.986004415E+14
radius 6378136.3
max_degree 360
errors no
end_of_head
gfc 0 0 1.0 0.0
",
    );

    let output = sharm(&["info", path_arg(&model)]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(stdout_json(&output)["nmax"], 360);
}

#[test]
fn convert_then_dv_keeps_coefficients() {
    let temp = TempDir::new().expect("tempdir should be created");
    let model = temp.path().join("model.tbl");
    let converted = temp.path().join("model.bin");
    write_file(&model, MODEL_TBL);

    let output = sharm(&["convert", path_arg(&model), path_arg(&converted)]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let direct = stdout_json(&sharm(&["dv", path_arg(&model)]));
    let round = stdout_json(&sharm(&["dv", path_arg(&converted)]));
    assert_eq!(direct["values"], round["values"]);
    assert_eq!(direct["quantity"], "degree_variances");
}

#[test]
fn roundtrip_recovers_coefficients() {
    let temp = TempDir::new().expect("tempdir should be created");
    let model = temp.path().join("model.tbl");
    write_file(&model, MODEL_TBL);

    for grid in ["gl", "dh1", "dh2"] {
        let output = sharm(&["roundtrip", path_arg(&model), "--grid", grid]);
        assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
        let report = stdout_json(&output);
        let max = report["max_difference_amplitude"].as_f64().expect("number");
        assert!(max < 1.0e-12, "{grid}: {max}");
    }
}

#[test]
fn synth_writes_grid_rows() {
    let temp = TempDir::new().expect("tempdir should be created");
    let model = temp.path().join("model.tbl");
    let report_path = temp.path().join("out/synth.json");
    write_file(&model, MODEL_TBL);

    let output = sharm(&[
        "synth",
        path_arg(&model),
        "--grid",
        "gl",
        "--quantity",
        "grad1",
        "--output",
        path_arg(&report_path),
    ]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let report: Value =
        serde_json::from_str(&fs::read_to_string(&report_path).expect("report should exist"))
            .expect("report should be JSON");
    let components = report["components"].as_array().expect("components");
    assert_eq!(components.len(), 3);
    let rows = components[0]["rows"].as_array().expect("rows");
    assert_eq!(rows.len(), report["lat"].as_array().expect("lat").len());
    assert_eq!(
        rows[0].as_array().expect("row").len(),
        report["lon"].as_array().expect("lon").len()
    );
}

#[test]
fn missing_file_exits_with_io_code() {
    let temp = TempDir::new().expect("tempdir should be created");
    let output = sharm(&["dv", path_arg(&temp.path().join("absent.tbl"))]);
    assert_eq!(output.status.code(), Some(3));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.starts_with("ERROR: [IO."), "{stderr}");
}

#[test]
fn excessive_degree_exits_with_invalid_argument_code() {
    let temp = TempDir::new().expect("tempdir should be created");
    let model = temp.path().join("model.tbl");
    write_file(&model, MODEL_TBL);
    let output = sharm(&["dv", path_arg(&model), "--nmax", "10"]);
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("INPUT.NMAX"));
}

#[test]
fn unknown_command_is_a_usage_error() {
    let output = sharm(&["frobnicate"]);
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("INPUT.CLI_USAGE"));
}

#[test]
fn invalid_config_is_rejected() {
    let temp = TempDir::new().expect("tempdir should be created");
    let model = temp.path().join("model.tbl");
    let config = temp.path().join("session.json");
    write_file(&model, MODEL_TBL);
    write_file(&config, r#"{ "block_nmax_multiplier": 0 }"#);
    let output = sharm(&["--config", path_arg(&config), "synth", path_arg(&model), "--grid", "dh1"]);
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("INPUT.CONFIG"));
}
