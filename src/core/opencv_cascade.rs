//! Reader for OpenCV's `opencv-cascade-classifier` XML, the format of the
//! stock `haarcascade_*.xml` files. Only boosted upright Haar stumps are
//! supported, which covers `haarcascade_frontalface_default.xml`.

use crate::common::{BallotError, Result};
use crate::core::cascade::{CascadeModel, CascadeStage, WeakClassifier, WeightedRect};
use roxmltree::{Document, Node};
use std::str::FromStr;

fn invalid(message: impl Into<String>) -> BallotError {
    BallotError::CapabilityUnavailable(format!("OpenCV cascade: {}", message.into()))
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Result<Node<'a, 'input>> {
    node.children()
        .find(|n| n.is_element() && n.has_tag_name(name))
        .ok_or_else(|| invalid(format!("missing <{}>", name)))
}

/// The `<_>` entries of a sequence element.
fn items<'a, 'input>(node: Node<'a, 'input>) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children().filter(|n| n.is_element() && n.has_tag_name("_"))
}

fn text<'a>(node: Node<'a, '_>) -> &'a str {
    node.text().unwrap_or("").trim()
}

fn scalar<T: FromStr>(node: Node<'_, '_>, name: &str) -> Result<T> {
    let value = text(child(node, name)?);
    value
        .parse()
        .map_err(|_| invalid(format!("<{}> is not a number: '{}'", name, value)))
}

fn numbers(node: Node<'_, '_>) -> Result<Vec<f64>> {
    text(node)
        .split_whitespace()
        .map(|token| {
            token.parse::<f64>().map_err(|_| {
                invalid(format!("<{}> holds a non-number '{}'", node.tag_name().name(), token))
            })
        })
        .collect()
}

fn whole(value: f64, what: &str) -> Result<u32> {
    if value >= 0.0 && value.fract() == 0.0 && value <= u32::MAX as f64 {
        Ok(value as u32)
    } else {
        Err(invalid(format!("{} must be a non-negative integer, got {}", what, value)))
    }
}

fn feature(node: Node<'_, '_>) -> Result<Vec<WeightedRect>> {
    if let Some(tilted) = node.children().find(|n| n.has_tag_name("tilted")) {
        if text(tilted) != "0" {
            return Err(invalid("tilted Haar features are not supported"));
        }
    }

    items(child(node, "rects")?)
        .map(|rect| match numbers(rect)?.as_slice() {
            [x, y, w, h, weight] => Ok(WeightedRect {
                x: whole(*x, "rect x")?,
                y: whole(*y, "rect y")?,
                width: whole(*w, "rect width")?,
                height: whole(*h, "rect height")?,
                weight: *weight as f32,
            }),
            other => Err(invalid(format!("a rect needs 5 values, got {}", other.len()))),
        })
        .collect()
}

fn weak_classifier(node: Node<'_, '_>, features: &[Vec<WeightedRect>]) -> Result<WeakClassifier> {
    let internal = numbers(child(node, "internalNodes")?)?;
    let leaves = numbers(child(node, "leafValues")?)?;

    let (feature_idx, threshold) = match (internal.as_slice(), leaves.as_slice()) {
        ([_left, _right, idx, threshold], [_, _]) => (whole(*idx, "feature index")?, *threshold),
        _ => return Err(invalid("only single-split weak classifiers are supported")),
    };
    let rects = features
        .get(feature_idx as usize)
        .ok_or_else(|| invalid(format!("feature index {} out of range", feature_idx)))?
        .clone();

    Ok(WeakClassifier {
        rects,
        threshold: threshold as f32,
        left: leaves[0] as f32,
        right: leaves[1] as f32,
    })
}

impl CascadeModel {
    /// Parses OpenCV cascade XML into a model for
    /// [`HaarCascade`](crate::core::cascade::HaarCascade).
    pub fn from_opencv_xml(xml: &str) -> Result<Self> {
        let doc = Document::parse(xml).map_err(|e| invalid(e.to_string()))?;
        let root = doc.root_element();
        let cascade = if root.has_tag_name("cascade") { root } else { child(root, "cascade")? };

        let stage_type = text(child(cascade, "stageType")?);
        let feature_type = text(child(cascade, "featureType")?);
        if stage_type != "BOOST" || feature_type != "HAAR" {
            return Err(invalid(format!(
                "expected a BOOST/HAAR cascade, got {}/{}",
                stage_type, feature_type
            )));
        }

        let features = items(child(cascade, "features")?)
            .map(feature)
            .collect::<Result<Vec<_>>>()?;

        let stages = items(child(cascade, "stages")?)
            .map(|stage| {
                let classifiers = items(child(stage, "weakClassifiers")?)
                    .map(|weak| weak_classifier(weak, &features))
                    .collect::<Result<Vec<_>>>()?;
                Ok(CascadeStage { threshold: scalar(stage, "stageThreshold")?, classifiers })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(CascadeModel {
            window_width: scalar(cascade, "width")?,
            window_height: scalar(cascade, "height")?,
            stages,
        })
    }
}
