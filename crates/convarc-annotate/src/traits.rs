use crate::data::{
    ContentPartData, DialogueData, ExchangeData, ExchangePlatformData, MessageTextData,
    PromptResponseData,
};
use crate::result::{AnnotationResult, AnnotatorSpec};

/// Annotators are stateless detectors: one typed data view in, a list of
/// annotation results out. The runner owns iteration order, cursors,
/// prerequisite checks and persistence.
pub trait MessageAnnotator {
    fn spec(&self) -> &AnnotatorSpec;
    fn annotate(&self, data: &MessageTextData) -> Vec<AnnotationResult>;
}

pub trait ExchangeAnnotator {
    fn spec(&self) -> &AnnotatorSpec;
    fn annotate(&self, data: &ExchangeData) -> Vec<AnnotationResult>;
}

pub trait ExchangePlatformAnnotator {
    fn spec(&self) -> &AnnotatorSpec;
    fn annotate(&self, data: &ExchangePlatformData) -> Vec<AnnotationResult>;
}

pub trait DialogueAnnotator {
    fn spec(&self) -> &AnnotatorSpec;
    fn annotate(&self, data: &DialogueData) -> Vec<AnnotationResult>;
}

pub trait ContentPartAnnotator {
    fn spec(&self) -> &AnnotatorSpec;
    fn annotate(&self, data: &ContentPartData) -> Vec<AnnotationResult>;
}

pub trait PromptResponseAnnotator {
    fn spec(&self) -> &AnnotatorSpec;
    fn annotate(&self, data: &PromptResponseData) -> Vec<AnnotationResult>;
}
