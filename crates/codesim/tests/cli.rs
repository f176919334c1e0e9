use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

fn codesim_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_codesim"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let src = root.join("src/pkg");
    fs::create_dir_all(&src).unwrap();
    fs::write(
        src.join("Greeter.java"),
        "public class Greeter {\n  // says hello\n  public void greet(String name) {\n    System.out.println(\"Hello \" + name);\n  }\n}\n",
    )
    .unwrap();
    fs::write(
        src.join("Copy.java"),
        "/* renamed copy */\npublic class Greeter {\n  public void greet(String who) {\n    System.out.println(\"Hi \" + who);\n  }\n}\n",
    )
    .unwrap();
    fs::write(
        src.join("Counter.java"),
        "class Counter {\n  private int count;\n  void increment() { count++; }\n}\n",
    )
    .unwrap();
    fs::write(src.join("notes.py"), "print('ignored')\n").unwrap();

    let config_path = config_dir.join("codesim.toml");
    fs::write(
        &config_path,
        format!(
            "[db]\npath = '{}'\n\n[staging]\ndir = '{}'\n",
            root.join("data/codesim.sqlite").display(),
            root.join("staging").display()
        ),
    )
    .unwrap();

    (tmp, config_path)
}

fn run(config: &Path, args: &[&str]) -> Output {
    Command::new(codesim_binary())
        .arg("--config")
        .arg(config)
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .unwrap()
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

#[test]
fn test_help() {
    let output = Command::new(codesim_binary()).arg("--help").output().unwrap();
    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("ingest"));
    assert!(text.contains("corpus"));
}

#[test]
fn test_init_ingest_compare() {
    let (tmp, config) = setup_test_env();

    let output = run(&config, &["init"]);
    assert!(output.status.success(), "{:?}", output);
    assert!(stdout(&output).contains("initialized"));

    let src = tmp.path().join("src");
    let output = run(&config, &["ingest", "--language", "java", src.to_str().unwrap()]);
    assert!(output.status.success(), "{:?}", output);
    let text = stdout(&output);
    assert!(text.contains("COMPLETED"), "{}", text);
    assert!(text.contains("processed 3"), "{}", text);

    let output = run(&config, &["list"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("(3 documents)"));

    // Copy.java sorts first, Counter.java second, Greeter.java third
    let output = run(&config, &["compare", "1", "3"]);
    assert!(output.status.success(), "{:?}", output);
    let score: f64 = stdout(&output)
        .trim()
        .trim_end_matches('%')
        .parse()
        .unwrap();
    assert!(score > 50.0, "score {}", score);

    let output = run(&config, &["corpus", "1", "--size", "10"]);
    assert!(output.status.success(), "{:?}", output);
    assert!(stdout(&output).contains("(2 candidates)"));

    let output = run(&config, &["batch", "1", "--ids", "2,3", "--min", "50"]);
    assert!(output.status.success(), "{:?}", output);
    assert!(stdout(&output).contains("Greeter.java"));

    let output = run(&config, &["stats"]);
    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("Documents:   3"), "{}", text);
    assert!(text.contains("JAVA"));

    let output = run(&config, &["purge"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("--yes"));

    let output = run(&config, &["purge", "--yes"]);
    assert!(output.status.success(), "{:?}", output);
    assert!(stdout(&output).contains("Deleted 3 documents."));
    assert!(stdout(&run(&config, &["list"])).contains("(0 documents)"));
}

#[test]
fn test_compare_unknown_document_fails() {
    let (_tmp, config) = setup_test_env();
    assert!(run(&config, &["init"]).status.success());

    let output = run(&config, &["compare", "1", "2"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("document not found"));
}

#[test]
fn test_unsupported_language_is_rejected() {
    let (tmp, config) = setup_test_env();
    let src = tmp.path().join("src");
    let output = run(&config, &["ingest", "--language", "cobol", src.to_str().unwrap()]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Supported languages"));
}
