//! Integration tests for CLI commands

use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

const VARS_HEADER: &str = "序号,变量键（KEY）,变量描述,变量类型,填写示例,文件路径,填写说明";
const DEPLOY_HEADER: &str =
    "步骤,资源类型,资源名称,命名空间,部署类型,YAML路径,镜像引用（DIGEST）,备注";
const SCRIPT_HEADER: &str =
    "步骤,脚本路径,是否幂等,是否依赖,执行机类型,执行用户,K8S命名空间,负载资源名称,备注";

/// Helper to run relpack command
fn relpack(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_relpack"))
        .args(args)
        .env_remove("RELPACK_OLD_REGISTRY")
        .env_remove("RELPACK_NEW_REGISTRY")
        .env_remove("RELPACK_MARKERS_ONLY")
        .env_remove("RELPACK_CHUNK_SIZE")
        .output()
        .expect("Failed to execute relpack")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn write(root: &Path, relative: &str, content: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn read(root: &Path, relative: &str) -> String {
    fs::read_to_string(root.join(relative)).unwrap()
}

/// An install directory with a namespace, a deployment and one script
fn create_release() -> TempDir {
    let dir = TempDir::new().unwrap();
    let root = dir.path();

    write(
        root,
        "controls/global-vars.csv",
        &format!(
            "\u{feff}{}\r\n1,NAMESPACE,target namespace,字符串,shop,k8s-resources/namespace-shop.yaml,\r\n2,REPLICAS,replica count,数值,2,,\r\n",
            VARS_HEADER
        ),
    );
    write(
        root,
        "controls/deploy-execution-plan.csv",
        &format!(
            "{}\n1,Namespace,shop,shop,更新,k8s-resources/namespace-shop.yaml,,\n2,Deployment,web,shop,更新,k8s-resources/deployment-web.yaml,harbor.old/shop/web/app@sha256:1234,\n",
            DEPLOY_HEADER
        ),
    );
    write(
        root,
        "controls/script-execution-plan.csv",
        &format!("{}\n1,scripts/init.sh,是,否,宿主机,root,,,\n", SCRIPT_HEADER),
    );
    write(
        root,
        "k8s-resources/namespace-shop.yaml",
        "apiVersion: v1\nkind: Namespace\nmetadata:\n  name: \x02NAMESPACE\x03\n",
    );
    write(
        root,
        "k8s-resources/deployment-web.yaml",
        "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: web\n  namespace: \\x02NAMESPACE\\x03\nspec:\n  replicas: \\x02REPLICAS\\x03\n  template:\n    spec:\n      containers:\n        - name: web\n          image: harbor.old/shop/web/app:1\n",
    );
    write(root, "scripts/init.sh", "#!/bin/sh\nkubectl get ns \x02NAMESPACE\x03\n");

    dir
}

mod check_command {
    use super::*;

    #[test]
    fn test_check_valid_release() {
        let dir = create_release();
        let before = read(dir.path(), "k8s-resources/namespace-shop.yaml");

        let output = relpack(&["check", dir.path().to_str().unwrap()]);

        assert!(output.status.success(), "stdout: {}", stdout(&output));
        assert!(stdout(&output).contains("Check passed"));
        assert_eq!(read(dir.path(), "k8s-resources/namespace-shop.yaml"), before);
    }

    #[test]
    fn test_check_json_output() {
        let dir = create_release();
        let output = relpack(&["check", dir.path().to_str().unwrap(), "--json"]);

        let json: serde_json::Value =
            serde_json::from_str(&stdout(&output)).expect("Output should be valid JSON");
        assert_eq!(json["success"], true);
        assert_eq!(json["phase"], "done");
        assert_eq!(json["summary"]["replacements"], 4);
        assert_eq!(
            json["correctedFiles"]["REPLICAS"][0],
            "k8s-resources/deployment-web.yaml"
        );
        assert_eq!(json["summary"]["filesFailed"], 0);
        assert_eq!(json["summary"]["filesSucceeded"], json["summary"]["templates"]);
        assert_eq!(json["summary"]["variablesMatched"], 2);
        assert_eq!(json["deployPlan"][1]["kind"], "Deployment");
        assert_eq!(json["deployPlan"][1]["action"], "update");
        assert_eq!(json["scriptPlan"][0]["script_path"], "scripts/init.sh");
    }

    #[test]
    fn test_check_reports_table_errors() {
        let dir = create_release();
        write(
            dir.path(),
            "controls/script-execution-plan.csv",
            &format!("{}\n1,scripts/init.sh,maybe,否,宿主机,root,,,\n", SCRIPT_HEADER),
        );

        let output = relpack(&["check", dir.path().to_str().unwrap()]);

        assert_eq!(output.status.code(), Some(2));
        let out = stdout(&output);
        assert!(out.contains("controls/script-execution-plan.csv"));
        assert!(out.contains("row 1 column 3"));
    }

    #[test]
    fn test_check_missing_directory() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        let output = relpack(&["check", missing.to_str().unwrap()]);
        assert_eq!(output.status.code(), Some(5));
    }
}

mod apply_command {
    use super::*;

    #[test]
    fn test_apply_substitutes_in_place() {
        let dir = create_release();

        let output = relpack(&[
            "apply",
            dir.path().to_str().unwrap(),
            "--old-registry",
            "harbor.old",
            "--new-registry",
            "harbor.new",
        ]);
        assert!(output.status.success(), "stdout: {}", stdout(&output));

        assert_eq!(
            read(dir.path(), "k8s-resources/namespace-shop.yaml"),
            "apiVersion: v1\nkind: Namespace\nmetadata:\n  name: shop\n"
        );
        assert_eq!(
            read(dir.path(), "scripts/init.sh"),
            "#!/bin/sh\nkubectl get ns shop\n"
        );

        let deployment = read(dir.path(), "k8s-resources/deployment-web.yaml");
        assert!(deployment.contains("namespace: shop"));
        assert!(deployment.contains("replicas: 2"));
        assert!(deployment.contains("harbor.new/shop/web/app@sha256:1234"));

        // BOM and CRLF survive the file-list write-back
        let vars = fs::read(dir.path().join("controls/global-vars.csv")).unwrap();
        assert!(vars.starts_with(&[0xEF, 0xBB, 0xBF]));
        let vars = String::from_utf8_lossy(&vars);
        assert!(vars.contains("\r\n"));
        assert!(vars.contains("2,REPLICAS,replica count,数值,2,k8s-resources/deployment-web.yaml,"));
    }

    #[test]
    fn test_apply_registry_from_environment() {
        let dir = create_release();

        let output = Command::new(env!("CARGO_BIN_EXE_relpack"))
            .args(["apply", dir.path().to_str().unwrap()])
            .env("RELPACK_OLD_REGISTRY", "harbor.old")
            .env("RELPACK_NEW_REGISTRY", "registry.local")
            .output()
            .expect("Failed to execute relpack");

        assert!(output.status.success(), "stdout: {}", stdout(&output));
        let deployment = read(dir.path(), "k8s-resources/deployment-web.yaml");
        assert!(deployment.contains("registry.local/shop/web/app@sha256:1234"));
    }

    #[test]
    fn test_apply_config_file() {
        let dir = create_release();
        write(
            dir.path(),
            "relpack.yaml",
            "markers: markersOnly\nregistry:\n  from: harbor.old\n  to: harbor.cfg\n",
        );

        let output = relpack(&["apply", dir.path().to_str().unwrap()]);
        assert!(output.status.success(), "stdout: {}", stdout(&output));

        // escaped tokens are plain text with markersOnly
        let deployment = read(dir.path(), "k8s-resources/deployment-web.yaml");
        assert!(deployment.contains("\\x02NAMESPACE\\x03"));
        assert!(deployment.contains("harbor.cfg/shop/web/app@sha256:1234"));
        assert_eq!(read(dir.path(), "scripts/init.sh"), "#!/bin/sh\nkubectl get ns shop\n");
    }

    #[test]
    fn test_apply_duplicate_key_touches_nothing() {
        let dir = create_release();
        write(
            dir.path(),
            "controls/global-vars.csv",
            &format!(
                "{}\n1,NAMESPACE,ns,字符串,shop,,\n2,NAMESPACE,ns,字符串,other,,\n",
                VARS_HEADER
            ),
        );
        let before = read(dir.path(), "scripts/init.sh");

        let output = relpack(&["apply", dir.path().to_str().unwrap()]);

        assert_eq!(output.status.code(), Some(2));
        assert!(stdout(&output).contains("NAMESPACE"));
        assert_eq!(read(dir.path(), "scripts/init.sh"), before);
    }

    #[test]
    fn test_apply_broken_manifest_touches_nothing() {
        let dir = create_release();
        write(
            dir.path(),
            "controls/global-vars.csv",
            &format!(
                "{}\n1,NAMESPACE,ns,字符串,shop,,\n2,REPLICAS,replicas,数值,2,,\n3,LABEL,label,字符串,\"{{broken: [\",k8s-resources/configmap-label.yaml,\n",
                VARS_HEADER
            ),
        );
        write(
            dir.path(),
            "k8s-resources/configmap-label.yaml",
            "apiVersion: v1\nkind: ConfigMap\ndata:\n  label: \x02LABEL\x03\n",
        );
        let files = [
            "controls/global-vars.csv",
            "k8s-resources/configmap-label.yaml",
            "k8s-resources/namespace-shop.yaml",
            "scripts/init.sh",
        ];
        let before: Vec<String> = files.iter().map(|f| read(dir.path(), f)).collect();

        let output = relpack(&["apply", dir.path().to_str().unwrap(), "--json"]);

        assert_eq!(output.status.code(), Some(2));
        let json: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
        assert_eq!(json["applied"], false);
        let failed: Vec<&serde_json::Value> = json["files"]
            .as_array()
            .unwrap()
            .iter()
            .filter(|f| f.get("error").is_some())
            .collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0]["code"], "manifest_parse");
        let after: Vec<String> = files.iter().map(|f| read(dir.path(), f)).collect();
        assert_eq!(after, before);
    }

    #[test]
    fn test_apply_blocked_by_table_error() {
        let dir = create_release();
        write(
            dir.path(),
            "controls/deploy-execution-plan.csv",
            &format!(
                "{}\n1,Deployment,web,shop,更新,k8s-resources/deployment-web.yaml,harbor.old/shop/web/app@sha256:1234,\n2,Namespace,shop,shop,更新,k8s-resources/namespace-shop.yaml,,\n",
                DEPLOY_HEADER
            ),
        );
        let before = read(dir.path(), "k8s-resources/namespace-shop.yaml");

        let output = relpack(&["apply", dir.path().to_str().unwrap(), "--json"]);

        assert_eq!(output.status.code(), Some(2));
        let json: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["phase"], "failed");
        assert_eq!(
            json["tables"][1]["errors"]["log"][0]["kind"],
            "deployOrderViolation"
        );
        assert_eq!(read(dir.path(), "k8s-resources/namespace-shop.yaml"), before);
    }

    #[test]
    fn test_apply_invalid_config() {
        let dir = create_release();
        write(dir.path(), "relpack.yaml", "chunkSize: 0\n");

        let output = relpack(&["apply", dir.path().to_str().unwrap()]);
        assert_eq!(output.status.code(), Some(64));
    }
}

mod tables_command {
    use super::*;

    #[test]
    fn test_tables_valid() {
        let dir = create_release();
        let output = relpack(&["tables", dir.path().to_str().unwrap()]);

        assert!(output.status.success(), "stdout: {}", stdout(&output));
        let out = stdout(&output);
        assert!(out.contains("controls/deploy-execution-plan.csv (schema 1.1)"));
        assert!(out.contains("All control tables are valid"));
    }

    #[test]
    fn test_tables_json() {
        let dir = create_release();
        fs::remove_file(dir.path().join("controls/script-execution-plan.csv")).unwrap();

        let output = relpack(&["tables", dir.path().to_str().unwrap(), "--json"]);
        let json: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();

        assert_eq!(json["valid"], true);
        assert_eq!(json["tables"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_tables_unknown_header() {
        let dir = create_release();
        write(
            dir.path(),
            "controls/deploy-execution-plan.csv",
            "step,kind,name\n1,Deployment,web\n",
        );

        let output = relpack(&["tables", dir.path().to_str().unwrap()]);
        assert_eq!(output.status.code(), Some(2));
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(stderr.contains("deploy-execution-plan"));
    }
}
