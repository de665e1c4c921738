// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Task working directory layout and entry-script argument conventions.
//!
//! A task directory on the host is bind-mounted at the container workspace
//! (`/workspace` by default), so every path handed to the script is the
//! workspace path plus the same relative layout used on the host:
//!
//! ```text
//! <data_root>/<kind>/<id>/
//!   script/               unpacked algorithm scripts
//!   dataset/data/         training or evaluation samples
//!   dataset/annotation/   annotation files
//!   model/                pre-trained or served weights
//!   checkpoint/           checkpoints to evaluate or extract from
//! ```

use serde_json::Value;
use std::path::{Component, Path, PathBuf};

pub const SCRIPT_DIR: &str = "script";
pub const DATA_DIR: &str = "dataset/data";
pub const ANNOTATION_DIR: &str = "dataset/annotation";
pub const MODEL_DIR: &str = "model";
pub const CHECKPOINT_DIR: &str = "checkpoint";
pub const EXTRACT_CHECKPOINT_FILE: &str = "checkpoint.pth";

pub const ARG_TASK_ID: &str = "--task_id";
pub const ARG_SERVICE_ID: &str = "--service_id";
pub const ARG_ANNOTATION_DIR: &str = "--annotation_dir";
pub const ARG_DATA_DIR: &str = "--data_dir";
pub const ARG_CLASS_NAMES: &str = "--class_names";
pub const ARG_PRE_WEIGHT_PATH: &str = "--pre_weight_path";
pub const ARG_EVAL_TYPE: &str = "--eval_type";
pub const ARG_MODEL_PATH: &str = "--model_path";
pub const ARG_CHECKPOINT_PATH: &str = "--checkpoint_path";

/// Name of the script archive inside the task directory.
pub fn script_archive_name(task_id: &str) -> String {
    format!("script_{}.zip", task_id)
}

/// Name of a cached image archive: `repo:tag` becomes `repo-tag.tar`.
pub fn image_archive_name(image: &str) -> String {
    format!("{}.tar", image.replace(':', "-"))
}

/// Container-side path of `relative` under the workspace mount.
pub fn container_path(workspace: &str, relative: &str) -> String {
    format!(
        "{}/{}",
        workspace.trim_end_matches('/'),
        relative.trim_start_matches('/')
    )
}

/// Same as [`container_path`] with the trailing separator scripts expect on
/// directory arguments.
pub fn container_dir(workspace: &str, relative: &str) -> String {
    format!("{}/", container_path(workspace, relative))
}

/// Maps a path reported by a container back onto the host task directory.
/// Paths under the workspace mount lose that prefix; anything else is taken as
/// relative to the task directory. `None` when the path has `..` or other
/// non-plain components and so could name a file outside the task directory.
pub fn host_path_for(task_dir: &Path, workspace: &str, reported: &str) -> Option<PathBuf> {
    let relative = Path::new(strip_workspace_prefix(workspace, reported).trim_start_matches('/'));
    let plain = relative
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    plain.then(|| task_dir.join(relative))
}

pub fn strip_workspace_prefix<'a>(workspace: &str, path: &'a str) -> &'a str {
    let workspace = workspace.trim_end_matches('/');
    match path.strip_prefix(workspace) {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
        _ => path,
    }
}

/// File name component of a reported path.
pub fn file_name_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Class names from a label map such as `{"0":"cat","1":"dog"}`, ordered by
/// integer key. Keys that are not integers are skipped; invalid JSON yields
/// nothing.
pub fn class_names(dataset_label: &str) -> Option<String> {
    if dataset_label.trim().is_empty() {
        return None;
    }
    let Ok(Value::Object(map)) = serde_json::from_str::<Value>(dataset_label) else {
        return None;
    };

    let mut entries: Vec<(i64, String)> = map
        .into_iter()
        .filter_map(|(key, value)| {
            let index = key.trim().parse::<i64>().ok()?;
            let name = match value {
                Value::String(s) => s,
                other => other.to_string(),
            };
            Some((index, name))
        })
        .collect();
    if entries.is_empty() {
        return None;
    }
    entries.sort_by_key(|(index, _)| *index);

    Some(
        entries
            .into_iter()
            .map(|(_, name)| name)
            .collect::<Vec<_>>()
            .join(","),
    )
}

/// Appends `--class_names <names>` when the label map yields any names.
pub fn push_class_names(args: &mut Vec<String>, dataset_label: &str) {
    if let Some(names) = class_names(dataset_label) {
        args.push(ARG_CLASS_NAMES.to_string());
        args.push(names);
    }
}
