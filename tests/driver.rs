mod common;

use std::collections::BTreeMap;
use std::fs;

use assert_matches::assert_matches;

use ase_pipeline_manager::domain::{AssayRole, Case, CaseId, RoleSlot};
use ase_pipeline_manager::driver::{self, RunOptions};
use ase_pipeline_manager::error::AsepmError;

use common::Fixture;

const CASE_ID: &str = "11111111-2222-3333-4444-555555555555";
const NORMAL_DNA: &str = "aaaaaaaa-0000-0000-0000-000000000001";
const TUMOR_RNA: &str = "aaaaaaaa-0000-0000-0000-000000000002";
const MAF_A: &str = "cccccccc-0000-0000-0000-000000000001";

fn one_case() -> BTreeMap<CaseId, Case> {
    let mut case = Case::new(CASE_ID.parse().unwrap(), "brca".parse().unwrap());
    *case.slot_mut(AssayRole::NormalDna) = RoleSlot {
        file_id: Some(NORMAL_DNA.parse().unwrap()),
        expected_md5: None,
        size: 4096,
        local_path: None,
    };
    *case.slot_mut(AssayRole::TumorRna) = RoleSlot {
        file_id: Some(TUMOR_RNA.parse().unwrap()),
        expected_md5: None,
        size: 2048,
        local_path: None,
    };
    case.maf_file_id = Some(MAF_A.parse().unwrap());
    let mut cases = BTreeMap::new();
    cases.insert(case.id.clone(), case);
    cases
}

#[test]
fn empty_store_schedules_only_the_first_stage() {
    let fixture = Fixture::new();

    let summary = driver::run(&fixture.config(), &RunOptions::default()).unwrap();

    let first = &summary.stages[0];
    assert_eq!(first.name, "Generate MAF configuration");
    assert_eq!(first.scheduled, 1);
    for stage in &summary.stages[1..] {
        assert_eq!(stage.scheduled, 0);
        assert_eq!(stage.blocked, 1, "{} should be blocked", stage.name);
    }

    assert!(fixture.read("next_steps.sh").contains("generate_maf_configuration"));
    // Nothing to download, so no download script at all.
    assert!(!fixture.exists("downloads.sh"));
    assert_eq!(summary.download_count, 0);
}

#[test]
fn reruns_are_byte_identical() {
    let fixture = Fixture::new();
    fixture.write_cases(&one_case());
    fixture.write_maf_manifest(&format!(
        r#"[{{"file_id": "{MAF_A}", "md5": "abc", "size": 10}}]"#
    ));
    fixture.add_download(NORMAL_DNA, "normal.bam", b"reads");
    let config = fixture.config();

    driver::run(&config, &RunOptions::default()).unwrap();
    let first_local = fixture.read("next_steps.sh");
    let first_downloads = fixture.read("downloads.sh");
    let first_cases = fixture.read("cases.tsv");

    driver::run(&config, &RunOptions::default()).unwrap();
    assert_eq!(fixture.read("next_steps.sh"), first_local);
    assert_eq!(fixture.read("downloads.sh"), first_downloads);
    assert_eq!(fixture.read("cases.tsv"), first_cases);
}

#[test]
fn download_requests_are_deduplicated_across_stages() {
    let fixture = Fixture::new();
    fixture.write_cases(&one_case());
    fixture.write_maf_manifest(&format!(
        r#"[{{"file_id": "{MAF_A}", "md5": "abc", "size": 10}}]"#
    ));

    let summary = driver::run(&fixture.config(), &RunOptions::default()).unwrap();

    // Both BAMs are wanted by the allcount stage and the download stage;
    // each id must still appear exactly once.
    let downloads = fixture.read("downloads.sh");
    assert_eq!(downloads.matches(NORMAL_DNA).count(), 1);
    assert_eq!(downloads.matches(TUMOR_RNA).count(), 1);
    assert_eq!(downloads.matches(MAF_A).count(), 1);
    assert_eq!(summary.download_count, 3);
    // Catalog sizes for the case slots, manifest size for the MAF.
    assert_eq!(summary.download_bytes, 4096 + 2048 + 10);
    for line in downloads.lines() {
        assert!(line.starts_with("/usr/pipeline/bin/gdc-client download --token-file"));
    }

    // The allcount stage runs earlier and claims both BAMs first.
    let download_stage = summary
        .stages
        .iter()
        .find(|stage| stage.name == "Download")
        .unwrap();
    assert_eq!(download_stage.new_downloads, 0);
}

#[test]
fn stale_scripts_are_removed_up_front() {
    let fixture = Fixture::new();
    fs::write(
        fixture.root.join("downloads.sh").as_std_path(),
        b"leftover",
    )
    .unwrap();
    fs::write(
        fixture.root.join("next_steps.sh").as_std_path(),
        b"leftover",
    )
    .unwrap();

    driver::run(&fixture.config(), &RunOptions::default()).unwrap();

    assert!(!fixture.exists("downloads.sh"));
    assert!(!fixture.read("next_steps.sh").contains("leftover"));
}

#[test]
fn dependency_check_aborts_before_writing_scripts() {
    let fixture = Fixture::new();
    fixture.write_cases(&one_case());
    // Orphaned allcount file: its source BAM is not in the store.
    fixture.add_derived(CASE_ID, &format!("{TUMOR_RNA}.allcount.gz"));

    let options = RunOptions {
        check_dependencies: true,
    };
    let err = driver::run(&fixture.config(), &options).unwrap_err();
    assert_matches!(err, AsepmError::DependencyViolations(1));
    assert!(!fixture.exists("next_steps.sh"));
    assert!(!fixture.exists("next_steps_linux.sh"));
}

#[test]
fn dependency_check_skips_case_stages_without_a_case_list() {
    let fixture = Fixture::new();
    // Leftover artifact from an earlier store, with no case list loaded:
    // the case-requiring verifiers must not run against it.
    fixture.add_derived(CASE_ID, &format!("{TUMOR_RNA}.allcount.gz"));

    let options = RunOptions {
        check_dependencies: true,
    };
    let summary = driver::run(&fixture.config(), &options).unwrap();

    assert_eq!(summary.stages[0].scheduled, 1);
    assert!(fixture.read("next_steps.sh").contains("generate_maf_configuration"));
}

#[test]
fn completed_vcfs_are_relocated_into_the_store() {
    let fixture = Fixture::new();
    fixture.write_cases(&one_case());
    let staging = fixture.data.join("completed_vcfs");
    fs::create_dir_all(staging.as_std_path()).unwrap();
    fs::write(
        staging.join(format!("{NORMAL_DNA}.vcf")).as_std_path(),
        b"variants",
    )
    .unwrap();
    fs::write(staging.join("readme.txt").as_std_path(), b"ignored").unwrap();

    let config = fixture.config_with(|raw| {
        raw.completed_vcfs_directory = Some(staging.to_string());
    });
    driver::run(&config, &RunOptions::default()).unwrap();

    let local = fixture.read("next_steps.sh");
    let destination = fixture.data.join("derived_files").join(CASE_ID);
    assert!(local.contains(&format!("mkdir -p {destination}")));
    assert!(local.contains(&format!("mv {staging}/{NORMAL_DNA}.vcf {destination}/")));
    assert!(!local.contains("readme.txt"));
}

#[test]
fn staging_directory_outside_the_store_is_fatal() {
    let fixture = Fixture::new();
    fixture.write_cases(&one_case());
    let staging = fixture.root.join("elsewhere").join("completed_vcfs");
    fs::create_dir_all(staging.as_std_path()).unwrap();
    fs::write(
        staging.join(format!("{NORMAL_DNA}.vcf")).as_std_path(),
        b"variants",
    )
    .unwrap();

    let config = fixture.config_with(|raw| {
        raw.completed_vcfs_directory = Some(staging.to_string());
    });
    let err = driver::run(&config, &RunOptions::default()).unwrap_err();
    assert_matches!(err, AsepmError::UnresolvedStagingRoot(_));
}

#[test]
fn case_list_is_rewritten_with_resolved_paths() {
    let fixture = Fixture::new();
    fixture.write_cases(&one_case());
    let bam = fixture.add_download(NORMAL_DNA, "normal.bam", b"reads");

    driver::run(&fixture.config(), &RunOptions::default()).unwrap();

    assert!(fixture.read("cases.tsv").contains(bam.as_str()));
}
