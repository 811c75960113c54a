use std::fs;
use std::path::PathBuf;

use anyhow::{Context, anyhow};
use clap::{Parser, Subcommand};
use geo::{Coord, Rect, coord};
use location_index::{
    ALL_EDGES, EdgeId, EdgeIteratorState, Graph, GeometryMode, IndexConfig, LocationIndex, NodeId,
};
use serde::Deserialize;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

#[derive(Parser, Debug)]
#[command(name = "location-index-cli", author, version, about, long_about = None)]
struct Cli {
    /// Path to a JSON graph file (see `GraphFile` for the expected shape)
    #[arg(env)]
    graph: PathBuf,

    /// Target leaf tile resolution, in meters
    #[arg(long, default_value_t = 300)]
    resolution: u32,

    /// Number of expanding tile rings to search before giving up
    #[arg(long, default_value_t = 4)]
    max_region_search: u32,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Snaps a coordinate onto the closest graph edge
    Snap {
        lat: f64,
        lon: f64,
    },
    /// Lists every edge whose indexed tile intersects a bounding box
    Range {
        min_lat: f64,
        min_lon: f64,
        max_lat: f64,
        max_lon: f64,
    },
}

/// On-disk graph format: a flat list of node coordinates and edges
/// referencing them by index, with optional interior pillar points.
#[derive(Debug, Deserialize)]
struct GraphFile {
    nodes: Vec<NodeRecord>,
    edges: Vec<EdgeRecord>,
}

#[derive(Debug, Deserialize)]
struct NodeRecord {
    lat: f64,
    lon: f64,
}

#[derive(Debug, Deserialize)]
struct EdgeRecord {
    base: u32,
    adj: u32,
    #[serde(default)]
    pillars: Vec<(f64, f64)>,
}

struct JsonGraph {
    nodes: Vec<Coord<f64>>,
    edges: Vec<(EdgeId, NodeId, NodeId)>,
    pillars: Vec<Vec<Coord<f64>>>,
}

impl JsonGraph {
    fn load(path: &PathBuf) -> anyhow::Result<Self> {
        let bytes =
            fs::read(path).with_context(|| format!("failed to read graph at {}", path.display()))?;
        let parsed: GraphFile = serde_json::from_slice(&bytes).context("invalid JSON graph")?;

        let nodes = parsed
            .nodes
            .iter()
            .map(|n| coord! { x: n.lon, y: n.lat })
            .collect();

        let mut edges = Vec::with_capacity(parsed.edges.len());
        let mut pillars = Vec::with_capacity(parsed.edges.len());
        for (index, edge) in parsed.edges.iter().enumerate() {
            let edge_id = EdgeId(i32::try_from(index).context("too many edges for an i32 id")?);
            edges.push((edge_id, NodeId(edge.base), NodeId(edge.adj)));
            pillars.push(
                edge.pillars
                    .iter()
                    .map(|&(lat, lon)| coord! { x: lon, y: lat })
                    .collect(),
            );
        }

        Ok(Self {
            nodes,
            edges,
            pillars,
        })
    }

    fn bounds(&self) -> anyhow::Result<Rect<f64>> {
        if self.nodes.is_empty() {
            return Err(anyhow!("graph has no nodes"));
        }
        let (mut min_x, mut min_y) = (f64::INFINITY, f64::INFINITY);
        let (mut max_x, mut max_y) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
        for n in &self.nodes {
            min_x = min_x.min(n.x);
            min_y = min_y.min(n.y);
            max_x = max_x.max(n.x);
            max_y = max_y.max(n.y);
        }
        Ok(Rect::new(
            coord! { x: min_x, y: min_y },
            coord! { x: max_x, y: max_y },
        ))
    }
}

impl Graph for JsonGraph {
    fn node_count(&self) -> u32 {
        u32::try_from(self.nodes.len()).unwrap_or(u32::MAX)
    }

    fn edge_count(&self) -> u32 {
        u32::try_from(self.edges.len()).unwrap_or(u32::MAX)
    }

    fn bounds(&self) -> Rect<f64> {
        self.bounds().expect("validated at load time")
    }

    fn node_coord(&self, node: NodeId) -> Coord<f64> {
        self.nodes[node.0 as usize]
    }

    fn edges(&self) -> Box<dyn Iterator<Item = (EdgeId, NodeId, NodeId)> + '_> {
        Box::new(self.edges.iter().copied())
    }

    fn fetch_way_geometry(&self, edge: EdgeId, mode: GeometryMode) -> Vec<Coord<f64>> {
        let (_, _, adj) = self.edges[edge.0 as usize];
        let mut points = self.pillars[edge.0 as usize].clone();
        if mode == GeometryMode::PillarsAndAdj {
            points.push(self.node_coord(adj));
        }
        points
    }

    fn edge_iterator_state_for_key(&self, key: u64) -> EdgeIteratorState {
        let (edge_id, base, adj) = self.edges[(key / 2) as usize];
        EdgeIteratorState {
            edge_id,
            base_node: base,
            adj_node: adj,
        }
    }

    fn outgoing_edges(&self, node: NodeId) -> Box<dyn Iterator<Item = EdgeIteratorState> + '_> {
        Box::new(self.edges.iter().filter_map(move |&(edge_id, base, adj)| {
            if base == node {
                Some(EdgeIteratorState {
                    edge_id,
                    base_node: base,
                    adj_node: adj,
                })
            } else if adj == node {
                Some(EdgeIteratorState {
                    edge_id,
                    base_node: adj,
                    adj_node: base,
                })
            } else {
                None
            }
        }))
    }
}

fn build_index(graph: &JsonGraph, resolution: u32, max_region_search: u32) -> anyhow::Result<LocationIndex> {
    let config = IndexConfig {
        min_resolution_in_meter: resolution,
        max_region_search,
        ..IndexConfig::default()
    };
    let mut index = LocationIndex::new(config)?;
    index.prepare_index(graph)?;
    Ok(index)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(EnvFilter::from_default_env()))
        .init();

    let cli = Cli::parse();
    let graph = JsonGraph::load(&cli.graph)?;
    info!(
        nodes = graph.nodes.len(),
        edges = graph.edges.len(),
        "loaded graph"
    );

    let index = build_index(&graph, cli.resolution, cli.max_region_search)?;

    match cli.command {
        Commands::Snap { lat, lon } => {
            let snap = index.find_closest(&graph, lat, lon, &ALL_EDGES)?;
            match snap {
                Some(snap) => {
                    let point = snap.snapped_coord(&graph);
                    let kind = match snap.kind {
                        location_index::SnapKind::Tower => "tower",
                        location_index::SnapKind::Pillar => "pillar",
                        location_index::SnapKind::Edge => "edge",
                    };
                    let output = serde_json::json!({
                        "edge_id": snap.edge.edge_id.0,
                        "base_node": snap.edge.base_node.0,
                        "adj_node": snap.edge.adj_node.0,
                        "fraction": snap.fraction,
                        "normalized_distance": snap.normalized_distance,
                        "kind": kind,
                        "snapped_lat": point.y,
                        "snapped_lon": point.x,
                    });
                    println!("{}", serde_json::to_string_pretty(&output)?);
                }
                None => println!("{}", serde_json::json!({ "snap": null })),
            }
        }
        Commands::Range {
            min_lat,
            min_lon,
            max_lat,
            max_lon,
        } => {
            let bbox = Rect::new(
                coord! { x: min_lon, y: min_lat },
                coord! { x: max_lon, y: max_lat },
            );
            let edges = index.query(&graph, bbox, &ALL_EDGES)?;
            let output: Vec<_> = edges
                .iter()
                .map(|e| {
                    serde_json::json!({
                        "edge_id": e.edge_id.0,
                        "base_node": e.base_node.0,
                        "adj_node": e.adj_node.0,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}
