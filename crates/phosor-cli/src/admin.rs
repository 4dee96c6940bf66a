//! Administrative subcommands: each call goes through a [`StoreHandle`] and
//! prints its result as a table or as JSON.

use anyhow::Result;
use phosor_store::{ClusterInfo, CopyStatus, ImageEntry, MultiCopyOutcome, StoreHandle};
use serde::Serialize;

pub enum AdminCommand {
    Clusters,
    Cluster { id: i32 },
    Images { id: i32 },
    Rename { id: i32, label: String },
    Merge { sources: Vec<i32>, target: i32 },
    Create { label: String },
    Delete { id: i32 },
    Unclustered,
    Move { filename: String, cluster: i32 },
    CopyMany { filename: String, clusters: Vec<i32>, new_label: Option<String> },
    DeleteImage { id: i32, filename: String },
    Representative { label: String },
    Summary,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_clusters(clusters: &[ClusterInfo]) {
    if clusters.is_empty() {
        println!("No clusters");
        return;
    }
    println!("{:>5}  {:<24} {:>6} {:>7}", "ID", "LABEL", "FACES", "IMAGES");
    for c in clusters {
        println!("{:>5}  {:<24} {:>6} {:>7}", c.cluster_id, c.label, c.num_faces, c.num_images);
    }
}

fn print_images(images: &[ImageEntry]) {
    for image in images {
        println!("{:>10}  {}", image.size, image.filename);
    }
    println!("{} image(s)", images.len());
}

fn print_copy_outcome(outcome: &MultiCopyOutcome) {
    for d in &outcome.destinations {
        let label = d.label.as_deref().unwrap_or("?");
        let created = if d.created { " (new)" } else { "" };
        match &d.status {
            CopyStatus::Copied { filename } => {
                println!("  {:>5}  {label}{created}: copied as {filename}", d.cluster_id)
            }
            CopyStatus::Failed { message, .. } => {
                println!("  {:>5}  {label}{created}: FAILED {message}", d.cluster_id)
            }
        }
    }
    println!(
        "{}: copied to {} of {} destination(s)",
        outcome.filename,
        outcome.copied(),
        outcome.destinations.len()
    );
}

pub async fn execute(store: &StoreHandle, command: AdminCommand, json: bool) -> Result<()> {
    match command {
        AdminCommand::Clusters => {
            let clusters = store.list_clusters().await?;
            if json {
                print_json(&clusters)?;
            } else {
                print_clusters(&clusters);
            }
        }
        AdminCommand::Cluster { id } => {
            let cluster = store.get_cluster(id).await?;
            if json {
                print_json(&cluster)?;
            } else {
                print_clusters(std::slice::from_ref(&cluster));
                if !cluster.sample_images.is_empty() {
                    println!("samples: {}", cluster.sample_images.join(", "));
                }
            }
        }
        AdminCommand::Images { id } => {
            let images = store.list_cluster_images(id).await?;
            if json {
                print_json(&images)?;
            } else {
                println!("{} ({})", images.label, images.cluster_id);
                print_images(&images.images);
            }
        }
        AdminCommand::Rename { id, label } => {
            let out = store.rename(id, &label).await?;
            if json {
                print_json(&out)?;
            } else if out.old_label == out.new_label {
                println!("Cluster {id} is already named {}", out.new_label);
            } else {
                println!("Renamed cluster {id}: {} -> {}", out.old_label, out.new_label);
            }
        }
        AdminCommand::Merge { sources, target } => {
            let out = store.merge(sources, target).await?;
            if json {
                print_json(&out)?;
            } else {
                println!(
                    "Merged {} cluster(s) into {target}, {} file(s) moved",
                    out.merged_clusters.len(),
                    out.images_moved
                );
            }
        }
        AdminCommand::Create { label } => {
            let cluster = store.create(&label).await?;
            if json {
                print_json(&cluster)?;
            } else {
                println!("Created cluster {} ({})", cluster.cluster_id, cluster.label);
            }
        }
        AdminCommand::Delete { id } => {
            let out = store.delete(id).await?;
            if json {
                print_json(&out)?;
            } else {
                println!("Deleted cluster {} ({})", out.cluster_id, out.label);
            }
        }
        AdminCommand::Unclustered => {
            let images = store.list_unclustered().await?;
            if json {
                print_json(&images)?;
            } else {
                print_images(&images);
            }
        }
        AdminCommand::Move { filename, cluster } => {
            let out = store.move_image(&filename, cluster).await?;
            if json {
                print_json(&out)?;
            } else {
                println!("Copied {filename} to {} as {}", out.cluster_label, out.filename);
            }
        }
        AdminCommand::CopyMany {
            filename,
            clusters,
            new_label,
        } => {
            let out = store.move_image_to_many(&filename, clusters, new_label).await?;
            if json {
                print_json(&out)?;
            } else {
                print_copy_outcome(&out);
            }
        }
        AdminCommand::DeleteImage { id, filename } => {
            store.delete_image(id, &filename).await?;
            if json {
                print_json(&serde_json::json!({ "cluster_id": id, "deleted": filename }))?;
            } else {
                println!("Deleted {filename} from cluster {id}");
            }
        }
        AdminCommand::Representative { label } => {
            let path = store.representative_path(&label).await?;
            if json {
                print_json(&serde_json::json!({ "label": label, "path": path }))?;
            } else {
                println!("{}", path.display());
            }
        }
        AdminCommand::Summary => {
            let doc = store.summary().await?;
            print_json(&doc)?;
        }
    }
    Ok(())
}
