use crate::{
    ChainError, DataSource, Link, PreparedHook, PreparingHook, Result, RunState, UnmatchedChild,
    log_error,
};
use rayon::prelude::*;
use std::{
    collections::HashMap,
    fmt::Debug,
    future::Future,
    hash::Hash,
    marker::PhantomData,
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
};
use tokio_util::sync::CancellationToken;

/// Runs two independent chains one after the other, producing both outputs.
pub struct Pair<A, B> {
    first: A,
    second: B,
}

impl<A: Link, B: Link> Pair<A, B> {
    pub fn new(first: A, second: B) -> Self {
        Self { first, second }
    }
}

impl<A: Link, B: Link> Link for Pair<A, B> {
    type Output = (A::Output, B::Output);

    fn data_source(&self) -> &DataSource {
        self.first.data_source()
    }
    /// Both sub-chains receive the hook.
    fn on_preparing(&mut self, hook: PreparingHook) {
        self.first.on_preparing(hook.clone());
        self.second.on_preparing(hook);
    }
    fn on_prepared(&mut self, hook: PreparedHook) {
        self.first.on_prepared(hook.clone());
        self.second.on_prepared(hook);
    }
    fn run(&self, state: &RunState) -> Result<Self::Output> {
        let first = self.first.run(state)?;
        let second = self.second.run(state)?;
        Ok((first, second))
    }
    fn run_async<'a>(
        &'a self,
        cancel: &'a CancellationToken,
        state: &'a RunState,
    ) -> impl Future<Output = Result<Self::Output>> + Send + 'a {
        async move {
            let first = self.first.run_async(cancel, state).await?;
            let second = self.second.run_async(cancel, state).await?;
            Ok((first, second))
        }
    }
}

/// How children are attached to their parents.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinOptions {
    /// Every matching parent receives the child, otherwise only the first one.
    pub multiple_parents: bool,
    /// Drop the children without parent instead of failing.
    pub ignore_unmatched_children: bool,
    /// Match the children on the rayon thread pool.
    pub parallel: bool,
}

impl JoinOptions {
    pub fn multiple_parents(mut self) -> Self {
        self.multiple_parents = true;
        self
    }
    pub fn ignore_unmatched_children(mut self) -> Self {
        self.ignore_unmatched_children = true;
        self
    }
    pub fn parallel(mut self) -> Self {
        self.parallel = true;
        self
    }
}

type Matcher<'a, P, C> = dyn Fn(&[P], &C) -> Vec<usize> + Sync + 'a;
type Target<'a, P, C> = dyn Fn(&mut P) -> &mut Vec<C> + Sync + 'a;

fn unmatched<C: Debug + Send + Sync + 'static>(child: C) -> crate::Error {
    log_error!(ChainError::UnmatchedChild(UnmatchedChild::new(child)))
}

/// Attaches every child to the parents chosen by `matches`, in the children order.
fn reconcile<P, C>(
    parents: &mut [P],
    children: Vec<C>,
    matches: &Matcher<'_, P, C>,
    target: &Target<'_, P, C>,
    options: &JoinOptions,
) -> Result<()>
where
    P: Send + Sync,
    C: Clone + Debug + Send + Sync + 'static,
{
    if options.parallel {
        return reconcile_parallel(parents, children, matches, target, options);
    }
    let mut ignored = 0;
    for child in children {
        let found = matches(parents, &child);
        let Some((&last, others)) = found.split_last() else {
            if options.ignore_unmatched_children {
                ignored += 1;
                continue;
            }
            return Err(unmatched(child));
        };
        for &i in others {
            target(&mut parents[i]).push(child.clone());
        }
        target(&mut parents[last]).push(child);
    }
    warn_ignored(ignored);
    Ok(())
}

fn warn_ignored(ignored: usize) {
    if ignored > 0 {
        log::warn!("Join ignored {} children without a parent", ignored);
    }
}

/// Children are matched concurrently, each parent has its own lock. Children are attached in
/// their original order, the result is the same as the serial one.
fn reconcile_parallel<P, C>(
    parents: &mut [P],
    children: Vec<C>,
    matches: &Matcher<'_, P, C>,
    target: &Target<'_, P, C>,
    options: &JoinOptions,
) -> Result<()>
where
    P: Send + Sync,
    C: Clone + Debug + Send + Sync + 'static,
{
    let buckets = parents
        .iter()
        .map(|_| Mutex::new(Vec::<(usize, C)>::new()))
        .collect::<Vec<_>>();
    let ignored = AtomicUsize::new(0);
    {
        let parents = &*parents;
        children
            .into_par_iter()
            .enumerate()
            .try_for_each(|(index, child)| {
                let found = matches(parents, &child);
                let Some((&last, others)) = found.split_last() else {
                    if options.ignore_unmatched_children {
                        ignored.fetch_add(1, Ordering::Relaxed);
                        return Ok(());
                    }
                    return Err(unmatched(child));
                };
                for &i in others {
                    buckets[i]
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push((index, child.clone()));
                }
                buckets[last]
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push((index, child));
                Ok(())
            })?;
    }
    warn_ignored(ignored.into_inner());
    for (parent, bucket) in parents.iter_mut().zip(buckets) {
        let mut attached = bucket.into_inner().unwrap_or_else(PoisonError::into_inner);
        if attached.is_empty() {
            continue;
        }
        attached.sort_unstable_by_key(|(i, _)| *i);
        target(parent).extend(attached.into_iter().map(|(_, child)| child));
    }
    Ok(())
}

/// Parent indexes by key, in ascending order.
fn index_parents<P, K, F>(parents: &[P], key: &F, parallel: bool) -> HashMap<K, Vec<usize>>
where
    P: Sync,
    K: Eq + Hash + Send,
    F: Fn(&P) -> K + Sync,
{
    if !parallel {
        let mut index = HashMap::<K, Vec<usize>>::with_capacity(parents.len());
        for (i, parent) in parents.iter().enumerate() {
            index.entry(key(parent)).or_default().push(i);
        }
        return index;
    }
    let mut index = parents
        .par_iter()
        .enumerate()
        .fold(HashMap::<K, Vec<usize>>::new, |mut index, (i, parent)| {
            index.entry(key(parent)).or_default().push(i);
            index
        })
        .reduce(HashMap::new, |mut lhs, rhs| {
            for (k, mut v) in rhs {
                lhs.entry(k).or_default().append(&mut v);
            }
            lhs
        });
    index.values_mut().for_each(|v| v.sort_unstable());
    index
}

fn limit(options: &JoinOptions) -> usize {
    if options.multiple_parents { usize::MAX } else { 1 }
}

macro_rules! forward_hooks {
    () => {
        fn data_source(&self) -> &DataSource {
            self.previous.data_source()
        }
        fn on_preparing(&mut self, hook: PreparingHook) {
            self.previous.on_preparing(hook);
        }
        fn on_prepared(&mut self, hook: PreparedHook) {
            self.previous.on_prepared(hook);
        }
    };
}

/// Attaches the children to the parents with the same key, the output is the parents.
pub struct KeyJoin<L, K, PK, CK, T> {
    previous: L,
    parent_key: PK,
    child_key: CK,
    target: T,
    options: JoinOptions,
    _key: PhantomData<fn() -> K>,
}

impl<L, K, PK, CK, T> KeyJoin<L, K, PK, CK, T> {
    pub fn new(previous: L, parent_key: PK, child_key: CK, target: T, options: JoinOptions) -> Self {
        Self {
            previous,
            parent_key,
            child_key,
            target,
            options,
            _key: PhantomData,
        }
    }
}

impl<L, P, C, K, PK, CK, T> KeyJoin<L, K, PK, CK, T>
where
    L: Link<Output = (Vec<P>, Vec<C>)>,
    P: Send + Sync,
    C: Clone + Debug + Send + Sync + 'static,
    K: Eq + Hash + Send + Sync,
    PK: Fn(&P) -> K + Send + Sync,
    CK: Fn(&C) -> K + Send + Sync,
    T: Fn(&mut P) -> &mut Vec<C> + Send + Sync,
{
    /// Reconciles an already loaded pair of collections.
    pub fn attach(&self, parents: &mut [P], children: Vec<C>) -> Result<()> {
        let index = index_parents(parents, &self.parent_key, self.options.parallel);
        let limit = limit(&self.options);
        let matches = |_: &[P], child: &C| -> Vec<usize> {
            index
                .get(&(self.child_key)(child))
                .map(|v| v.iter().take(limit).copied().collect())
                .unwrap_or_default()
        };
        reconcile(parents, children, &matches, &self.target, &self.options)
    }
}

impl<L, P, C, K, PK, CK, T> Link for KeyJoin<L, K, PK, CK, T>
where
    L: Link<Output = (Vec<P>, Vec<C>)>,
    P: Send + Sync,
    C: Clone + Debug + Send + Sync + 'static,
    K: Eq + Hash + Send + Sync,
    PK: Fn(&P) -> K + Send + Sync,
    CK: Fn(&C) -> K + Send + Sync,
    T: Fn(&mut P) -> &mut Vec<C> + Send + Sync,
{
    type Output = Vec<P>;

    forward_hooks!();

    fn run(&self, state: &RunState) -> Result<Vec<P>> {
        let (mut parents, children) = self.previous.run(state)?;
        self.attach(&mut parents, children)?;
        Ok(parents)
    }

    fn run_async<'a>(
        &'a self,
        cancel: &'a CancellationToken,
        state: &'a RunState,
    ) -> impl Future<Output = Result<Vec<P>>> + Send + 'a {
        async move {
            let (mut parents, children) = self.previous.run_async(cancel, state).await?;
            self.attach(&mut parents, children)?;
            Ok(parents)
        }
    }
}

/// Attaches the children to the parents accepted by a predicate, testing every pair.
pub struct PredicateJoin<L, M, T> {
    previous: L,
    predicate: M,
    target: T,
    options: JoinOptions,
}

impl<L, M, T> PredicateJoin<L, M, T> {
    pub fn new(previous: L, predicate: M, target: T, options: JoinOptions) -> Self {
        Self {
            previous,
            predicate,
            target,
            options,
        }
    }
}

impl<L, P, C, M, T> PredicateJoin<L, M, T>
where
    L: Link<Output = (Vec<P>, Vec<C>)>,
    P: Send + Sync,
    C: Clone + Debug + Send + Sync + 'static,
    M: Fn(&P, &C) -> bool + Send + Sync,
    T: Fn(&mut P) -> &mut Vec<C> + Send + Sync,
{
    pub fn attach(&self, parents: &mut [P], children: Vec<C>) -> Result<()> {
        let limit = limit(&self.options);
        let matches = |parents: &[P], child: &C| -> Vec<usize> {
            parents
                .iter()
                .enumerate()
                .filter(|(_, parent)| (self.predicate)(*parent, child))
                .map(|(i, _)| i)
                .take(limit)
                .collect()
        };
        reconcile(parents, children, &matches, &self.target, &self.options)
    }
}

impl<L, P, C, M, T> Link for PredicateJoin<L, M, T>
where
    L: Link<Output = (Vec<P>, Vec<C>)>,
    P: Send + Sync,
    C: Clone + Debug + Send + Sync + 'static,
    M: Fn(&P, &C) -> bool + Send + Sync,
    T: Fn(&mut P) -> &mut Vec<C> + Send + Sync,
{
    type Output = Vec<P>;

    forward_hooks!();

    fn run(&self, state: &RunState) -> Result<Vec<P>> {
        let (mut parents, children) = self.previous.run(state)?;
        self.attach(&mut parents, children)?;
        Ok(parents)
    }

    fn run_async<'a>(
        &'a self,
        cancel: &'a CancellationToken,
        state: &'a RunState,
    ) -> impl Future<Output = Result<Vec<P>>> + Send + 'a {
        async move {
            let (mut parents, children) = self.previous.run_async(cancel, state).await?;
            self.attach(&mut parents, children)?;
            Ok(parents)
        }
    }
}
