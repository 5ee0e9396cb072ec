use crate::opensyde::sysup::sysdef::{FlashJob, Node};
use crate::opensyde::sysup::Error;

use std::fs;
use std::path::Path;

// File name handling -----------------------------------------------------------------------------

///
/// Extract the file name portion of a path.
///
/// Handles both separator styles so that paths recorded on a foreign host (e.g. a Windows
/// style `C:\x\file.bin`) still reduce to their base name.
///
pub fn extract_file_name(path: &str) -> &str {
    match path.rfind(['/', '\\']) {
        Some(index) => &path[index + 1..],
        None => path,
    }
}

// Temporary folder creation ----------------------------------------------------------------------

///
/// Copy all files to be flashed into a temporary folder, one sub directory per node.
///
/// Ensures a clearly defined state during the whole flashing procedure. To be called
/// optionally before starting the procedure with `activate_flashloader`.
///
/// * All referenced files must be present.
/// * A pre-existing target folder is erased (contents only).
/// * The target folder is created recursively if required.
/// * Files for address based targets are renamed to `<index>_<name>` to keep them unique;
///   files for file based targets keep their name (uniqueness is checked up front).
///
/// `jobs` is rewritten to reference the copied files, but only if the whole operation
/// succeeds; on failure the caller's paths stay untouched. A failure can leave the target
/// folder partially populated.
///
pub fn create_temporary_folder(
    nodes: &[Node],
    active_nodes: &[bool],
    target_path: &str,
    jobs: &mut Vec<FlashJob>,
) -> Result<(), Error> {
    if !target_path.ends_with('/') && !target_path.ends_with('\\') {
        return Err(Error::Range(format!(
            "Target path \"{}\" does not end in a path separator",
            target_path
        )));
    }

    if jobs.len() != nodes.len() || active_nodes.len() != nodes.len() {
        return Err(Error::Overflow(format!(
            "Vector sizes do not match the number of nodes ({})",
            nodes.len()
        )));
    }

    // consistent configuration ?
    for (node_index, node) in nodes.iter().enumerate() {
        let files = &jobs[node_index].files_to_flash;

        if !files.is_empty() && !active_nodes[node_index] {
            return Err(Error::NoAct(format!(
                "Files to flash configured for inactive node \"{}\"",
                node.name
            )));
        }
        if active_nodes[node_index]
            && !node.device_definition.flashloader_is_file_based
            && files.len() > node.applications.len()
        {
            // not relevant for file based servers
            return Err(Error::NoAct(format!(
                "More files than applications configured for node \"{}\"",
                node.name
            )));
        }

        if active_nodes[node_index] {
            for file in files {
                if !Path::new(file).is_file() {
                    return Err(Error::Range(format!("Could not find file \"{}\"", file)));
                }
            }
        }

        // file based nodes must have unique file names
        if node.device_definition.flashloader_is_file_based {
            for (file_index, file) in files.iter().enumerate() {
                for other_file in files.iter().skip(file_index + 1) {
                    if extract_file_name(file) == extract_file_name(other_file) {
                        return Err(Error::Config(format!(
                            "Node \"{}\" has at least two identically named files (\"{}\")",
                            node.name,
                            extract_file_name(file)
                        )));
                    }
                }
            }
        }
    }

    // erase target path if it exists (keep the directory itself)
    if Path::new(target_path).is_dir() {
        if let Err(error) = remove_directory_content(Path::new(target_path)) {
            log::error!(
                "Creating temporary folder: could not erase \"{}\": {}",
                target_path,
                error
            );
            return Err(Error::Busy);
        }
    }

    if let Err(error) = fs::create_dir_all(target_path) {
        log::error!(
            "Creating temporary folder: could not create \"{}\": {}",
            target_path,
            error
        );
        return Err(Error::Timeout);
    }

    // one sub directory per active node
    let mut node_target_paths: Vec<String> = vec![String::new(); nodes.len()];
    for (node_index, node) in nodes.iter().enumerate() {
        if active_nodes[node_index] {
            let node_path = format!("{}{}/", target_path, node.name);
            if let Err(error) = fs::create_dir_all(&node_path) {
                log::error!(
                    "Creating temporary folder: could not create \"{}\": {}",
                    node_path,
                    error
                );
                return Err(Error::Timeout);
            }
            node_target_paths[node_index] = node_path;
        }
    }

    // copy files
    let mut new_jobs = jobs.clone();
    for (node_index, node) in nodes.iter().enumerate() {
        if !active_nodes[node_index] {
            continue;
        }
        for (file_index, source) in jobs[node_index].files_to_flash.iter().enumerate() {
            let target = if node.device_definition.flashloader_is_file_based {
                // file based nodes need the unchanged file name
                format!(
                    "{}{}",
                    node_target_paths[node_index],
                    extract_file_name(source)
                )
            } else {
                // the original name is not relevant for address based nodes and may repeat;
                // prefix with the 1 based index to keep the copies unique
                format!(
                    "{}{}_{}",
                    node_target_paths[node_index],
                    file_index + 1,
                    extract_file_name(source)
                )
            };

            if let Err(error) = fs::copy(source, &target) {
                log::error!(
                    "Copying file: could not copy \"{}\" to \"{}\": {}",
                    source,
                    target,
                    error
                );
                return Err(Error::RdWr(format!("Could not copy \"{}\"", source)));
            }
            new_jobs[node_index].files_to_flash[file_index] = target;
        }
    }

    // hand the new paths back to the caller
    *jobs = new_jobs;
    Ok(())
}

fn remove_directory_content(path: &Path) -> std::io::Result<()> {
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(entry.path())?;
        } else {
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

// Tests ------------------------------------------------------------------------------------------
