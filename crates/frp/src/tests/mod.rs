//! End-to-end scenarios exercising the combinator surface against a real
//! `Runtime`. Each module is self-contained: build a small graph, drive
//! it with sends, assert on a captured history.

mod scenario_chained_map;
mod scenario_global_cell_loop;
mod scenario_join_handler_ordering;
mod scenario_pascal_clusters;
mod scenario_rank_based_admission;
mod scenario_snapshot_simultaneity;
