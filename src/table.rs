use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::{AppError, AppResult};

/// Column names of a [`TopicTable`], in row order.
pub const COLUMNS: [&str; 5] = ["text", "topic", "label", "x", "y"];

/// One document placed on the map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicRow {
    pub text: String,
    pub topic: i32,
    pub label: String,
    pub x: f64,
    pub y: f64,
}

/// Row-oriented view of a run; row `i` describes document `i`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TopicTable {
    pub rows: Vec<TopicRow>,
}

impl TopicTable {
    pub fn columns() -> [&'static str; 5] {
        COLUMNS
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TopicRow> {
        self.rows.iter()
    }
}

impl<'a> IntoIterator for &'a TopicTable {
    type Item = &'a TopicRow;
    type IntoIter = std::slice::Iter<'a, TopicRow>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

/// Zip the parallel columns into a table. `points` must have exactly two columns and
/// every input must have one entry per document; nothing is built otherwise.
pub fn build(
    documents: &[String],
    topics: &[i32],
    labels: &[String],
    points: &Array2<f64>,
) -> AppResult<TopicTable> {
    if points.ncols() != 2 {
        return Err(AppError::ShapeMismatch(format!(
            "points have {} columns, expected 2",
            points.ncols()
        )));
    }
    let n = documents.len();
    if topics.len() != n || labels.len() != n || points.nrows() != n {
        return Err(AppError::ShapeMismatch(format!(
            "{} documents, {} topics, {} labels and {} points",
            n,
            topics.len(),
            labels.len(),
            points.nrows()
        )));
    }

    let rows = documents
        .iter()
        .zip(topics)
        .zip(labels)
        .zip(points.rows())
        .map(|(((text, &topic), label), point)| TopicRow {
            text: text.clone(),
            topic,
            label: label.clone(),
            x: point[0],
            y: point[1],
        })
        .collect();
    Ok(TopicTable { rows })
}

#[cfg(test)]
mod tests {
    use ndarray::array;
    use serde_json::Value;

    use super::*;

    fn strings(prefix: &str, n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{prefix} {i}")).collect()
    }

    #[test]
    fn five_documents_make_five_rows() {
        let points = array![[0.0, 1.0], [1.0, 2.0], [2.0, 3.0], [3.0, 4.0], [4.0, 5.0]];
        let table = build(
            &strings("doc", 5),
            &[0, 0, 1, 1, -1],
            &strings("title", 5),
            &points,
        )
        .unwrap();
        assert_eq!(table.len(), 5);
        assert_eq!(TopicTable::columns(), ["text", "topic", "label", "x", "y"]);

        let json = serde_json::to_value(&table).unwrap();
        let Value::Array(rows) = json else {
            panic!("table should serialise as an array");
        };
        assert_eq!(rows.len(), 5);
        let keys: Vec<&str> = rows[0]
            .as_object()
            .unwrap()
            .keys()
            .map(String::as_str)
            .collect();
        let mut expected = COLUMNS.to_vec();
        expected.sort();
        let mut keys_sorted = keys.clone();
        keys_sorted.sort();
        assert_eq!(keys_sorted, expected);
    }

    #[test]
    fn serialised_field_order_matches_columns() {
        let row = TopicRow {
            text: "t".into(),
            topic: 3,
            label: "l".into(),
            x: 0.5,
            y: -0.5,
        };
        assert_eq!(
            serde_json::to_string(&row).unwrap(),
            r#"{"text":"t","topic":3,"label":"l","x":0.5,"y":-0.5}"#
        );
    }

    #[test]
    fn rows_follow_document_order() {
        let docs = strings("doc", 4);
        let labels = strings("title", 4);
        let points = array![[0.0, 10.0], [1.0, 11.0], [2.0, 12.0], [3.0, 13.0]];
        let table = build(&docs, &[7, 3, 7, -1], &labels, &points).unwrap();
        for (i, row) in table.iter().enumerate() {
            assert_eq!(row.text, docs[i]);
            assert_eq!(row.label, labels[i]);
            assert_eq!(row.x, i as f64);
            assert_eq!(row.y, 10.0 + i as f64);
        }
        assert_eq!(
            table.iter().map(|r| r.topic).collect::<Vec<_>>(),
            vec![7, 3, 7, -1]
        );
    }

    #[test]
    fn length_mismatch_is_rejected() {
        let points = array![[0.0, 0.0], [1.0, 1.0]];
        let docs = strings("doc", 2);
        assert!(matches!(
            build(&docs, &[0], &strings("t", 2), &points),
            Err(AppError::ShapeMismatch(_))
        ));
        assert!(matches!(
            build(&docs, &[0, 1], &strings("t", 3), &points),
            Err(AppError::ShapeMismatch(_))
        ));
        assert!(matches!(
            build(&strings("doc", 3), &[0, 1, 2], &strings("t", 3), &points),
            Err(AppError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn points_must_be_two_dimensional() {
        let points = array![[0.0, 0.0, 0.0]];
        assert!(matches!(
            build(&strings("doc", 1), &[0], &strings("t", 1), &points),
            Err(AppError::ShapeMismatch(_))
        ));
    }
}
