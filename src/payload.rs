//! Values that cross the isolation boundary.
//!
//! Arguments are encoded into [`Value`]s when a job is submitted and decoded
//! inside the execution context; results travel the other way. Anything that
//! implements `Serialize`/`Deserialize` can be transported.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::pool::{PoolError, PoolResult};

/// Transportable value.
pub use serde_json::Value;

/// Ordered positional arguments of a job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Args(Vec<Value>);

impl Args {
    /// Empty argument list.
    #[inline]
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Wrap already encoded values.
    #[inline]
    pub fn from_values(values: Vec<Value>) -> Self {
        Self(values)
    }

    /// Encode and append one argument.
    pub fn push<T: Serialize + ?Sized>(
        &mut self,
        value: &T,
    ) -> PoolResult<()> {
        self.0.push(serde_json::to_value(value)?);
        Ok(())
    }

    /// Builder form of [`Args::push`].
    pub fn with<T: Serialize + ?Sized>(
        mut self,
        value: &T,
    ) -> PoolResult<Self> {
        self.push(value)?;
        Ok(self)
    }

    /// Encode every item of an iterator.
    pub fn encode_all<I, T>(items: I) -> PoolResult<Self>
    where
        I: IntoIterator<Item = T>,
        T: Serialize,
    {
        items
            .into_iter()
            .map(|item| serde_json::to_value(&item).map_err(PoolError::from))
            .collect::<PoolResult<Vec<_>>>()
            .map(Self)
    }

    /// Decode the argument at `index`.
    pub fn get<T: DeserializeOwned>(
        &self,
        index: usize,
    ) -> PoolResult<T> {
        let value = self.0.get(index).ok_or_else(|| {
            PoolError::Transport(format!(
                "missing argument {} (got {})",
                index,
                self.0.len()
            ))
        })?;
        Ok(T::deserialize(value)?)
    }

    /// Decode every argument as the same type.
    pub fn decode_all<T: DeserializeOwned>(&self) -> PoolResult<Vec<T>> {
        self.0
            .iter()
            .map(|value| T::deserialize(value).map_err(PoolError::from))
            .collect()
    }

    /// Number of arguments.
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Encoded values.
    #[inline]
    pub fn values(&self) -> &[Value] {
        &self.0
    }

    #[inline]
    pub fn into_values(self) -> Vec<Value> {
        self.0
    }
}

impl FromIterator<Value> for Args {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for Args {
    type Item = Value;
    type IntoIter = std::vec::IntoIter<Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Build [`Args`] from heterogeneous serializable expressions.
///
/// Evaluates to `PoolResult<Args>`.
///
/// ```
/// use parallel_pool::args;
///
/// let args = args![1, "two", 3.0].unwrap();
/// assert_eq!(args.len(), 3);
/// ```
#[macro_export]
macro_rules! args {
    () => {
        $crate::pool::PoolResult::<$crate::payload::Args>::Ok($crate::payload::Args::new())
    };
    ($($value:expr),+ $(,)?) => {
        (|| -> $crate::pool::PoolResult<$crate::payload::Args> {
            let mut args = $crate::payload::Args::new();
            $( args.push(&$value)?; )+
            Ok(args)
        })()
    };
}
