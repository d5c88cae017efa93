use std::fs;
use std::path::Path;

use bud_core::{BuildContext, Key, Tasks};
use parking_lot::Mutex;

use super::*;

fn collector() -> (Arc<Mutex<Vec<String>>>, impl Fn(String) + Send + Sync + 'static) {
    let lines = Arc::new(Mutex::new(Vec::new()));
    let lines_ = Arc::clone(&lines);
    (lines, move |line| lines_.lock().push(line))
}

fn cli(dir: &Path, commands: &[&str]) -> Cli {
    Cli {
        dir: dir.to_path_buf(),
        configs: vec!["calming_period=10ms".to_string()],
        watch: false,
        commands: commands.iter().map(|c| c.to_string()).collect(),
    }
}

fn workspace() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().canonicalize().unwrap();
    fs::write(
        root.join("Bud.toml"),
        r#"
        [projects.A]
        sources = ["."]
        filter = "*.txt"

        [projects.B]
        sources = ["."]
        filter = "*.txt"
        dependencies = ["A"]
        "#,
    )
    .unwrap();
    for (project, file) in [("A", "a.txt"), ("B", "b.txt")] {
        fs::create_dir(root.join(project)).unwrap();
        fs::write(root.join(project).join(file), "").unwrap();
    }
    (dir, root)
}

fn streams() -> Tasker {
    Tasker::new(Tasks::new(), streams_conf())
}

fn streams_conf() -> BuildContext {
    let files = Observable::from_iter([InOut::from_paths(["a"]), InOut::from_paths(["b"])]);
    Conf::new()
        .set_value(&Key::new("/Files"), files)
        .set_value(&Key::new("/Name"), "bud".to_string())
        .set_value(&Key::new("/Answer"), 42u32)
        .to_compiled()
        .unwrap()
}

#[test]
fn prints_the_input_of_a_project() {
    let (_dir, root) = workspace();
    let (lines, print) = collector();
    run(&cli(&root, &["B/Input"]), print).unwrap();

    let expected = format!(
        "{}\n{}",
        root.join("A").join("a.txt").display(),
        root.join("B").join("b.txt").display()
    );
    assert_eq!(lines.lock().as_slice(), &[expected]);
}

#[test]
fn undefined_keys_fail() {
    let (_dir, root) = workspace();
    let (_, print) = collector();
    let err = run(&cli(&root, &["A/Nope"]), print).unwrap_err();
    assert!(err.to_string().contains("'A/Nope'"), "{err}");
}

#[test]
fn clean_deletes_the_build_dir() {
    let (_dir, root) = workspace();
    let build_dir = root.join("A").join("build");
    fs::create_dir(&build_dir).unwrap();

    let (lines, print) = collector();
    run(&cli(&root, &["A/Clean"]), print).unwrap();
    assert!(!build_dir.exists());
    assert_eq!(lines.lock().as_slice(), &["done".to_string()]);
}

#[test]
fn missing_build_description() {
    let dir = tempfile::tempdir().unwrap();
    let (_, print) = collector();
    let err = run(&cli(dir.path(), &["A/Input"]), print).unwrap_err();
    assert!(format!("{err:#}").contains("Bud.toml"), "{err:#}");
}

#[test]
fn invalid_configs() {
    let (_dir, root) = workspace();

    let mut unknown = cli(&root, &["A/Input"]);
    unknown.configs.push("nope=1".to_string());
    let (_, print) = collector();
    let err = run(&unknown, print).unwrap_err();
    assert!(err.to_string().contains("'nope'"), "{err}");

    let mut malformed = cli(&root, &["A/Input"]);
    malformed.configs.push("calming_period".to_string());
    let (_, print) = collector();
    assert!(run(&malformed, print).is_err());
}

#[test]
fn streams_print_their_first_observation() {
    let (lines, print) = collector();
    execute(&streams(), &["Name".to_string(), "Files".to_string()], false, print).unwrap();
    assert_eq!(
        lines.lock().as_slice(),
        &["bud".to_string(), "a".to_string()]
    );
}

#[test]
fn watching_prints_every_observation() {
    let (lines, print) = collector();
    execute(&streams(), &["Files".to_string()], true, print).unwrap();
    assert_eq!(
        lines.lock().as_slice(),
        &["Files:\na".to_string(), "Files:\nb".to_string()]
    );
}

#[test]
fn values_that_cant_be_printed_print_their_type() {
    let (lines, print) = collector();
    execute(&streams(), &["/Answer".to_string()], false, print).unwrap();
    assert_eq!(lines.lock().as_slice(), &["<u32>".to_string()]);
}

#[test]
fn tasks_run_when_no_key_matches() {
    let tasks = Tasks::new()
        .set(&Key::<PathBuf>::new("A/package"), |_| async {
            Ok(PathBuf::from("/A/A.pkg"))
        })
        .unwrap();
    let (lines, print) = collector();
    execute(&Tasker::new(tasks, streams_conf()), &["A/package".to_string()], false, print).unwrap();
    assert_eq!(lines.lock().as_slice(), &["/A/A.pkg".to_string()]);
}

#[test]
fn projects_can_be_packaged() {
    let (_dir, root) = workspace();
    let (_, print) = collector();
    let err = run(&cli(&root, &["A/package"]), print).unwrap_err();
    let message = format!("{err:#}");
    assert!(message.contains("'A/package' failed"), "{message}");
    assert!(message.contains("Packager"), "{message}");
}
