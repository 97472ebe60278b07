//! Backup synthesis scenarios.

use crate::common::*;

fn doc(defaults: &str, backups: &str) -> String {
    format!(
        concat!(
            "metadata:\n",
            "  name: app\n",
            "  namespace: proj-app\n",
            "  project: proj\n",
            "{defaults}",
            "components:\n",
            "  db:\n",
            "    image: postgres\n",
            "    volumes:\n",
            "      state:\n",
            "        src:\n",
            "          pvc:\n",
            "            size: 5Gi\n",
            "        dest:\n",
            "          dir: /var/lib/postgresql\n",
            "{backups}",
        ),
        defaults = defaults,
        backups = backups,
    )
}

#[test]
fn scheduled_backup_emits_cronjob_run_and_service_account() {
    let (_dir, staged) = empty_staging();
    let resources = synthesize_doc(
        &doc(
            "",
            concat!(
                "    backups:\n",
                "      - name: nightly\n",
                "        schedule: '0 2 * * *'\n",
                "        repository_configs:\n",
                "          - raw: 'type: s3'\n",
                "        source:\n",
                "          volumes:\n",
                "            state:\n",
                "              - /data\n",
            ),
        ),
        &staged,
    );

    let cron_jobs = all_of(&resources, "CronJob");
    assert_eq!(cron_jobs.len(), 1);
    let cron = yaml_of(cron_jobs[0]);
    assert!(cron.contains("schedule: 0 2 * * *"));
    assert!(cron.contains("concurrencyPolicy: Forbid"));
    assert!(cron.contains("mountPath: /mnt/src/state"));
    assert!(cron.contains("claimName: app-db-state"));
    assert!(cron.contains("topologyKey: kubernetes.io/hostname"));

    let runs = all_of(&resources, "BackupRun");
    assert_eq!(runs.len(), 1);
    let run = yaml_of(runs[0]);
    assert!(run.contains("name: nightly"));
    assert!(run.contains("- /mnt/src/state/data"));

    let accounts = all_of(&resources, "ServiceAccount");
    assert_eq!(accounts.len(), 1);
    assert!(accounts[0].name().starts_with("backup-db-nightly-"));
}

#[test]
fn unscheduled_backup_is_a_one_shot_job_with_ttl() {
    let (_dir, staged) = empty_staging();
    let resources = synthesize_doc(
        &doc(
            "",
            concat!(
                "    backups:\n",
                "      - name: adhoc\n",
                "        repository_configs:\n",
                "          - raw: 'type: local'\n",
            ),
        ),
        &staged,
    );
    assert!(all_of(&resources, "CronJob").is_empty());
    let job = yaml_of(all_of(&resources, "Job")[0]);
    assert!(job.contains("ttlSecondsAfterFinished: 3600"));
    assert!(job.contains("restartPolicy: OnFailure"));
}

#[test]
fn overlays_fill_in_unset_fields_only() {
    let (_dir, staged) = empty_staging();
    let resources = synthesize_doc(
        &doc(
            concat!(
                "defaults:\n",
                "  backup:\n",
                "    overlays:\n",
                "      standard:\n",
                "        schedule: '0 2 * * *'\n",
                "        scale_down: true\n",
                "        repository_configs:\n",
                "          - raw: 'type: s3'\n",
            ),
            concat!(
                "    backups:\n",
                "      - name: nightly\n",
                "        overlays: [standard]\n",
                "        schedule: '0 4 * * *'\n",
            ),
        ),
        &staged,
    );

    let cron = yaml_of(all_of(&resources, "CronJob")[0]);
    assert!(cron.contains("schedule: 0 4 * * *"), "explicit field wins");

    let run = yaml_of(all_of(&resources, "BackupRun")[0]);
    assert!(run.contains("type: s3"), "overlay repository survives");
    assert!(run.contains("scaleDownDeployments"));
    assert!(run.contains("name: app-db"));
}

#[test]
fn secret_backed_backup_volume_mirrors_and_mounts() {
    let (_dir, staged) = empty_staging();
    let resources = synthesize_doc(
        &doc(
            "",
            concat!(
                "    backups:\n",
                "      - name: nightly\n",
                "        volumes:\n",
                "          - secret:\n",
                "              namespace: infra\n",
                "              name: backup-creds\n",
                "              key: key.pem\n",
                "            dest:\n",
                "              file: /etc/backup/key.pem\n",
            ),
        ),
        &staged,
    );

    let mirror = yaml_of(find(&resources, "Secret", "infra-backup-creds-mirror").unwrap());
    assert!(mirror.contains("reflector.v1.k8s.emberstack.com/reflects: infra/backup-creds"));

    let job = yaml_of(all_of(&resources, "Job")[0]);
    assert!(job.contains("secretName: infra-backup-creds-mirror"));
    assert!(job.contains("mountPath: /etc/backup/key.pem"));
    assert!(job.contains("subPath: key.pem"));
}

#[test]
fn backup_of_unknown_volume_is_a_synthesis_error() {
    let (_dir, staged) = empty_staging();
    let err = try_synthesize_doc(
        &doc(
            "",
            concat!(
                "    backups:\n",
                "      - name: nightly\n",
                "        source:\n",
                "          volumes:\n",
                "            missing:\n",
                "              - /data\n",
            ),
        ),
        &staged,
    )
    .unwrap_err();
    assert!(err.to_string().contains("volume 'missing'"));
}
