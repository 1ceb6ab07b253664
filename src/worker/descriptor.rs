//! Test and suite descriptors
//!
//! Discovery is not this crate's business: whoever builds the [`Registry`]
//! decides what tests exist. The engine only reads descriptors, and never
//! looks inside test parameters.

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::time::Duration;

use crate::assert::{TestContext, TestResult};
use crate::common::{Error, Result};

/// Opaque parameter handed to a parameterized test body
pub type Param = Box<dyn Any + Send>;

/// Plain test body
pub type TestFn = fn(&mut TestContext<'_>) -> TestResult;

/// Parameterized test body
pub type ParamTestFn = fn(&mut TestContext<'_>, &(dyn Any + Send)) -> TestResult;

/// Setup / teardown callback
pub type Fixture = fn();

/// Identity of a test, `category::name`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TestId {
    pub category: String,
    pub name: String,
}

impl TestId {
    pub fn new(category: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for TestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}::{}", self.category, self.name)
    }
}

/// The code a test runs
#[derive(Clone, Copy)]
pub enum TestBody {
    Simple(TestFn),
    Parameterized {
        run: ParamTestFn,
        /// Produces the parameter list; evaluated in both collector (to count
        /// instances) and worker (to pick one)
        params: fn() -> Vec<Param>,
    },
}

impl std::fmt::Debug for TestBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Simple(_) => write!(f, "Simple"),
            Self::Parameterized { .. } => write!(f, "Parameterized"),
        }
    }
}

/// A suite: shared fixtures for every test in one category
#[derive(Debug, Clone)]
pub struct SuiteDescriptor {
    pub name: String,
    pub init: Option<Fixture>,
    pub fini: Option<Fixture>,
}

impl SuiteDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            init: None,
            fini: None,
        }
    }

    pub fn init(mut self, f: Fixture) -> Self {
        self.init = Some(f);
        self
    }

    pub fn fini(mut self, f: Fixture) -> Self {
        self.fini = Some(f);
        self
    }
}

/// A single test
#[derive(Debug, Clone)]
pub struct TestDescriptor {
    pub category: String,
    pub name: String,
    pub init: Option<Fixture>,
    pub fini: Option<Fixture>,
    pub body: TestBody,
    /// Overrides the configured time budget for this test
    pub timeout: Option<Duration>,
}

impl TestDescriptor {
    pub fn new(category: impl Into<String>, name: impl Into<String>, body: TestFn) -> Self {
        Self {
            category: category.into(),
            name: name.into(),
            init: None,
            fini: None,
            body: TestBody::Simple(body),
            timeout: None,
        }
    }

    pub fn parameterized(
        category: impl Into<String>,
        name: impl Into<String>,
        run: ParamTestFn,
        params: fn() -> Vec<Param>,
    ) -> Self {
        Self {
            category: category.into(),
            name: name.into(),
            init: None,
            fini: None,
            body: TestBody::Parameterized { run, params },
            timeout: None,
        }
    }

    pub fn init(mut self, f: Fixture) -> Self {
        self.init = Some(f);
        self
    }

    pub fn fini(mut self, f: Fixture) -> Self {
        self.fini = Some(f);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn id(&self) -> TestId {
        TestId::new(self.category.clone(), self.name.clone())
    }

    /// Number of worker runs this test expands to
    pub fn instances(&self) -> usize {
        match self.body {
            TestBody::Simple(_) => 1,
            TestBody::Parameterized { params, .. } => params().len(),
        }
    }
}

/// A test scheduled for one worker run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedTest {
    pub id: TestId,
    pub param: Option<usize>,
    pub timeout: Option<Duration>,
}

impl std::fmt::Display for PlannedTest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.param {
            Some(index) => write!(f, "{}[{}]", self.id, index),
            None => write!(f, "{}", self.id),
        }
    }
}

/// Explicitly populated set of suites and tests
///
/// Built once at startup, read-only afterwards.
#[derive(Debug, Default)]
pub struct Registry {
    suites: Vec<SuiteDescriptor>,
    tests: Vec<TestDescriptor>,
}

/// Stand-in for tests whose category has no registered suite
static NO_SUITE_FIXTURES: SuiteDescriptor = SuiteDescriptor {
    name: String::new(),
    init: None,
    fini: None,
};

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register suite-level fixtures for a category
    pub fn suite(mut self, suite: SuiteDescriptor) -> Self {
        self.suites.push(suite);
        self
    }

    /// Register a test
    pub fn test(mut self, test: TestDescriptor) -> Self {
        self.tests.push(test);
        self
    }

    pub fn tests(&self) -> &[TestDescriptor] {
        &self.tests
    }

    /// Suite for a category; categories without fixtures get an empty suite
    pub fn suite_for(&self, category: &str) -> &SuiteDescriptor {
        self.suites
            .iter()
            .find(|s| s.name == category)
            .unwrap_or(&NO_SUITE_FIXTURES)
    }

    /// Look up a test and its suite
    pub fn find(&self, id: &TestId) -> Result<(&TestDescriptor, &SuiteDescriptor)> {
        let test = self
            .tests
            .iter()
            .find(|t| t.category == id.category && t.name == id.name)
            .ok_or_else(|| Error::TestNotFound(id.to_string()))?;
        Ok((test, self.suite_for(&test.category)))
    }

    /// Expand every test whose display id contains `filter` into worker runs
    pub fn plan(&self, filter: Option<&str>) -> Vec<PlannedTest> {
        let mut plan = Vec::new();
        for test in &self.tests {
            let id = test.id();
            if let Some(pattern) = filter {
                if !id.to_string().contains(pattern) {
                    continue;
                }
            }
            match test.body {
                TestBody::Simple(_) => plan.push(PlannedTest {
                    id,
                    param: None,
                    timeout: test.timeout,
                }),
                TestBody::Parameterized { .. } => {
                    for index in 0..test.instances() {
                        plan.push(PlannedTest {
                            id: id.clone(),
                            param: Some(index),
                            timeout: test.timeout,
                        });
                    }
                }
            }
        }
        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: &mut TestContext<'_>) -> TestResult {
        Ok(())
    }

    fn with_param(_: &mut TestContext<'_>, _: &(dyn Any + Send)) -> TestResult {
        Ok(())
    }

    fn three_params() -> Vec<Param> {
        vec![Box::new(1u32), Box::new(2u32), Box::new(3u32)]
    }

    fn registry() -> Registry {
        Registry::new()
            .suite(SuiteDescriptor::new("math"))
            .test(TestDescriptor::new("math", "adds", noop))
            .test(TestDescriptor::parameterized("math", "cases", with_param, three_params))
            .test(TestDescriptor::new("io", "reads", noop).timeout(Duration::from_secs(2)))
    }

    #[test]
    fn test_find() {
        let registry = registry();
        let (test, suite) = registry.find(&TestId::new("math", "adds")).unwrap();
        assert_eq!(test.name, "adds");
        assert_eq!(suite.name, "math");

        let (_, suite) = registry.find(&TestId::new("io", "reads")).unwrap();
        assert!(suite.init.is_none() && suite.fini.is_none());

        assert!(matches!(
            registry.find(&TestId::new("math", "missing")),
            Err(Error::TestNotFound(id)) if id == "math::missing"
        ));
    }

    #[test]
    fn test_plan_expands_parameters() {
        let plan = registry().plan(None);
        let names: Vec<String> = plan.iter().map(ToString::to_string).collect();
        assert_eq!(
            names,
            vec!["math::adds", "math::cases[0]", "math::cases[1]", "math::cases[2]", "io::reads"]
        );
        assert_eq!(plan[4].timeout, Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_plan_filter() {
        let plan = registry().plan(Some("io::"));
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].id, TestId::new("io", "reads"));
    }
}
