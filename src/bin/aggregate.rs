use std::fs::File;
use std::path::PathBuf;

use log::info;
use serde::Serialize;
use structopt::StructOpt;

use amg_coarsen::utils::laplace_1d;
use amg_coarsen::{
    aggregate_coupled, amalgamate, AggregationBuilder, GraphOptions, InProcessExchange, Ordering,
    RowDistribution,
};

#[derive(StructOpt, Debug)]
#[structopt(
    name = "aggregate",
    about = "Partition the graph of a sparse matrix into aggregates"
)]
struct Opt {
    /// Matrix Market file with the system matrix
    #[structopt(parse(from_os_str), required_unless = "demo")]
    matrix: Option<PathBuf>,

    /// Use a generated 1-D Poisson matrix of this size instead of a file
    #[structopt(long)]
    demo: Option<usize>,

    /// Consecutive rows collapsed into one graph vertex
    #[structopt(long, default_value = "1")]
    block_size: usize,

    /// Relative tolerance below which couplings are dropped
    #[structopt(long, default_value = "0.0")]
    drop_tolerance: f64,

    #[structopt(long, default_value = "2")]
    min_agg_size: usize,

    /// Upper bound on aggregate size; unlimited when absent
    #[structopt(long)]
    max_agg_size: Option<usize>,

    #[structopt(long, default_value = "0")]
    max_selected_neighbors: usize,

    /// Seed visitation order: natural, random, or graph
    #[structopt(long, default_value = "natural")]
    ordering: Ordering,

    #[structopt(long)]
    skip_phase1: bool,

    #[structopt(long)]
    skip_phase2a: bool,

    #[structopt(long)]
    skip_phase2b: bool,

    #[structopt(long)]
    skip_phase3: bool,

    #[structopt(long, default_value = "0.5")]
    phase3_agg_creation: f64,

    /// Number of ranks the vertices are split over
    #[structopt(long, default_value = "1")]
    ranks: usize,

    /// Let boundary leftovers join aggregates on neighboring ranks
    #[structopt(long)]
    coupled: bool,

    /// Write the aggregation report to this file as JSON
    #[structopt(long, parse(from_os_str))]
    json: Option<PathBuf>,
}

#[derive(Serialize)]
struct RankReport {
    rank: usize,
    num_aggregates: usize,
    num_unaggregated: usize,
    sizes: Vec<usize>,
    /// Matrix rows per aggregate
    aggregates: Vec<Vec<usize>>,
}

#[derive(Serialize)]
struct Report {
    config: AggregationBuilder,
    ranks: usize,
    coupled: bool,
    cross_processors: bool,
    per_rank: Vec<RankReport>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init();
    let opt = Opt::from_args();

    let mat = match (&opt.matrix, opt.demo) {
        (Some(path), _) => sprs::io::read_matrix_market::<f64, usize, _>(path)?.to_csr::<usize>(),
        (None, Some(n)) => laplace_1d(n),
        (None, None) => unreachable!("structopt enforces matrix or --demo"),
    };
    info!("matrix: {} rows, {} nonzeros", mat.rows(), mat.nnz());

    let graph_options = GraphOptions {
        block_size: opt.block_size,
        drop_tolerance: opt.drop_tolerance,
    };
    let (graph, amalg) = amalgamate(&mat, &graph_options)?;

    let builder = AggregationBuilder {
        min_agg_size: opt.min_agg_size,
        max_agg_size: opt.max_agg_size.unwrap_or(usize::MAX),
        max_selected_neighbors: opt.max_selected_neighbors,
        ordering: opt.ordering,
        enable_phase1: !opt.skip_phase1,
        enable_phase2a: !opt.skip_phase2a,
        enable_phase2b: !opt.skip_phase2b,
        enable_phase3: !opt.skip_phase3,
        phase3_agg_creation: opt.phase3_agg_creation,
    };
    info!(
        "aggregating {} vertices over {} ranks ({} mode, {} ordering)",
        graph.num_owned(),
        opt.ranks,
        if opt.coupled { "coupled" } else { "uncoupled" },
        builder.ordering,
    );

    let distribution = RowDistribution::contiguous(graph.num_owned(), opt.ranks)?;
    let report = if opt.coupled {
        let result = aggregate_coupled(&builder, &graph, &distribution, &InProcessExchange)?;
        let per_rank = (0..opt.ranks)
            .map(|rank| {
                let first = result.rank_offset(rank);
                let last = first + result.local_num_aggregates(rank);
                let aggregates: Vec<Vec<usize>> = (first..last)
                    .map(|agg| {
                        result
                            .members(agg)
                            .into_iter()
                            .flat_map(|v| amalg.rows_of(v))
                            .collect()
                    })
                    .collect();
                let num_unaggregated = distribution
                    .owned_range(rank)?
                    .filter(|&v| result.aggregate_of(v).is_none())
                    .count();
                Ok(RankReport {
                    rank,
                    num_aggregates: result.local_num_aggregates(rank),
                    num_unaggregated,
                    sizes: (first..last).map(|agg| result.size_of(agg)).collect(),
                    aggregates,
                })
            })
            .collect::<Result<Vec<_>, amg_coarsen::Error>>()?;
        Report {
            config: builder.clone(),
            ranks: opt.ranks,
            coupled: true,
            cross_processors: result.cross_processors(),
            per_rank,
        }
    } else {
        let results = builder.aggregate_distributed(&graph, &distribution)?;
        let per_rank = results
            .iter()
            .enumerate()
            .map(|(rank, aggs)| {
                let local = distribution.local_graph(&graph, rank)?;
                let (agg_start, agg_to_row) = amalg.unamalgamate(aggs, &local);
                let aggregates = (0..aggs.num_aggregates())
                    .map(|a| agg_to_row[agg_start[a]..agg_start[a + 1]].to_vec())
                    .collect();
                Ok(RankReport {
                    rank,
                    num_aggregates: aggs.num_aggregates(),
                    num_unaggregated: aggs.num_unaggregated(),
                    sizes: aggs.aggregate_sizes().to_vec(),
                    aggregates,
                })
            })
            .collect::<Result<Vec<_>, amg_coarsen::Error>>()?;
        Report {
            config: builder.clone(),
            ranks: opt.ranks,
            coupled: false,
            cross_processors: false,
            per_rank,
        }
    };

    for rank_report in &report.per_rank {
        println!("++ rank {} ++", rank_report.rank);
        println!(
            "   aggregates: {}   unaggregated: {}",
            rank_report.num_aggregates, rank_report.num_unaggregated
        );
        for (agg, rows) in rank_report.aggregates.iter().enumerate() {
            let rows: Vec<String> = rows.iter().map(|r| r.to_string()).collect();
            println!("   aggregate {}: {}", agg, rows.join(" "));
        }
    }

    if let Some(path) = &opt.json {
        serde_json::to_writer_pretty(File::create(path)?, &report)?;
        info!("report written to {}", path.display());
    }
    Ok(())
}
