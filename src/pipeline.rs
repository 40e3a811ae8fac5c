use tracing::info;

use crate::config::PipelineConfig;
use crate::embed::{Embedder, embed_all};
use crate::reduce::{self, Reducer};
use crate::table::{self, TopicTable};
use crate::topics::{TopicAssignments, TopicRunner};
use crate::{AppError, AppResult};

/// Everything a run produces.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutput {
    pub table: TopicTable,
    pub assignments: TopicAssignments,
}

/// Embeds, clusters and projects a document collection, in that order.
/// Every stage runs to completion before the next starts and the first error ends the run.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Run with the reducer chosen by the configuration.
    pub fn run<E: Embedder>(
        &self,
        embedder: &E,
        texts: &[String],
        labels: &[String],
    ) -> AppResult<PipelineOutput> {
        let reducer = reduce::from_options(&self.config.reduce, self.config.embed.verbose);
        self.run_with(embedder, &reducer, texts, labels)
    }

    /// Run with an explicit reducer.
    #[tracing::instrument(
        name = "Running pipeline",
        level = "info",
        skip(self, embedder, reducer, texts, labels)
    )]
    pub fn run_with<E: Embedder, R: Reducer + ?Sized>(
        &self,
        embedder: &E,
        reducer: &R,
        texts: &[String],
        labels: &[String],
    ) -> AppResult<PipelineOutput> {
        if texts.len() != labels.len() {
            return Err(AppError::ShapeMismatch(format!(
                "{} texts but {} labels",
                texts.len(),
                labels.len()
            )));
        }
        info!("Processing {} documents", texts.len());

        let embeddings = embed_all(
            embedder,
            texts,
            self.config.embed.batch_size,
            self.config.embed.verbose,
        )?;

        let runner = TopicRunner::new(embedder, &self.config.topics)
            .with_batch_size(self.config.embed.batch_size);
        let assignments = runner.fit_transform_embeddings(&embeddings)?;

        let points = reducer.fit_transform(&embeddings)?;
        let table = table::build(texts, &assignments.topics, labels, &points)?;

        Ok(PipelineOutput { table, assignments })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EmbedOptions, ReduceMethod, ReduceOptions, TopicOptions};
    use crate::embed::testing::HashEmbedder;
    use crate::reduce::PcaReducer;
    use crate::table::COLUMNS;

    fn documents() -> (Vec<String>, Vec<String>) {
        let texts = vec![
            "rust borrow checker ownership".to_string(),
            "rust lifetimes ownership borrow".to_string(),
            "pasta tomato basil garlic".to_string(),
            "pasta garlic olive tomato".to_string(),
            "pasta basil olive garlic".to_string(),
        ];
        let labels = (0..texts.len()).map(|i| format!("doc-{i}")).collect();
        (texts, labels)
    }

    fn config(method: ReduceMethod) -> PipelineConfig {
        PipelineConfig {
            topics: TopicOptions {
                min_cluster_size: 2,
                ..Default::default()
            },
            reduce: ReduceOptions {
                method,
                n_neighbors: 3,
                n_epochs: 50,
                ..Default::default()
            },
            embed: EmbedOptions {
                verbose: false,
                ..Default::default()
            },
        }
    }

    #[test]
    fn five_documents_make_a_five_row_table() {
        let (texts, labels) = documents();
        let embedder = HashEmbedder { dim: 64 };
        for method in [ReduceMethod::Pca, ReduceMethod::Umap] {
            let out = Pipeline::new(config(method))
                .run(&embedder, &texts, &labels)
                .unwrap();
            assert_eq!(out.table.len(), 5);
            assert_eq!(out.assignments.len(), 5);
            assert_eq!(TopicTable::columns(), COLUMNS);
            for (i, row) in out.table.iter().enumerate() {
                assert_eq!(row.text, texts[i]);
                assert_eq!(row.label, labels[i]);
                assert_eq!(row.topic, out.assignments.topics[i]);
                assert!(row.x.is_finite() && row.y.is_finite());
            }
        }
    }

    #[test]
    fn empty_collection_is_a_clustering_error() {
        let pipeline = Pipeline::new(config(ReduceMethod::Pca));
        let out = pipeline.run(&HashEmbedder { dim: 8 }, &[], &[]);
        assert!(matches!(out, Err(AppError::Clustering(_))));
    }

    #[test]
    fn reducer_must_produce_two_columns() {
        let (texts, labels) = documents();
        let out = Pipeline::new(config(ReduceMethod::Pca)).run_with(
            &HashEmbedder { dim: 64 },
            &PcaReducer::new(3),
            &texts,
            &labels,
        );
        assert!(matches!(out, Err(AppError::ShapeMismatch(_))));
    }

    #[test]
    fn label_count_must_match() {
        let (texts, mut labels) = documents();
        labels.pop();
        let pipeline = Pipeline::new(config(ReduceMethod::Pca));
        let out = pipeline.run(&HashEmbedder { dim: 8 }, &texts, &labels);
        assert!(matches!(out, Err(AppError::ShapeMismatch(_))));
    }
}
