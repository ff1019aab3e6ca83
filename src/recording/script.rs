//! JavaScript injected into every document via
//! `Page::AddScriptToEvaluateOnNewDocument`. It implements SelectorEngine and
//! ContentRecorder entirely in-page (the only practical place a capture-phase
//! DOM listener and a `postMessage` cross-frame aggregator can live); the
//! Rust side only ever sees already-normalized Steps and drives Start/Pause/
//! Resume/Stop through a single awaited entry point.
//!
//! Installation is idempotent (`window.__rrInstalled` guard) so repeated
//! injection across navigations within the same document is harmless.

/// Name of the CDP binding content→Rust data messages (`steps`/`variables`
/// batches) are posted through. Fire-and-forget; acks for control messages
/// travel back as the resolved value of the `evaluate` call instead.
pub const EVENT_BINDING_NAME: &str = "__rrEvent";

/// The recorder script. `{binding}` is substituted with [`EVENT_BINDING_NAME`].
pub fn content_recorder_script() -> String {
    RECORDER_JS.replace("__RR_BINDING__", EVENT_BINDING_NAME)
}

const RECORDER_JS: &str = r#"
(() => {
  if (window.__rrInstalled) return true;
  window.__rrInstalled = true;

  const INPUT_DEBOUNCE_MS = 800;
  const BATCH_MS = 100;
  const SCROLL_DEBOUNCE_MS = 350;
  const DBLCLICK_THRESHOLD_MS = 300;
  const SENSITIVE_TYPES = new Set(['password']);
  const OVERLAY_ID = '__rr_overlay';

  const isTop = window.top === window;

  // ---------------------------------------------------------------------
  // SelectorEngine
  // ---------------------------------------------------------------------
  const refMap = new WeakMap();
  let refCounter = 0;
  const classSelectorCache = new WeakMap();
  const pathSelectorCache = new WeakMap();

  function escapeAttr(v) {
    return typeof CSS !== 'undefined' && CSS.escape ? CSS.escape(v) : String(v).replace(/["\\]/g, '\\$&');
  }

  function refFor(el) {
    let r = refMap.get(el);
    if (!r) {
      r = 'ref_' + (++refCounter);
      refMap.set(el, r);
    }
    return r;
  }

  function uniqueClassSelector(el) {
    if (classSelectorCache.has(el)) return classSelectorCache.get(el);
    let result = null;
    const classes = (el.className && typeof el.className === 'string')
      ? el.className.trim().split(/\s+/).filter(Boolean)
      : [];
    for (const c of classes.slice(0, 3)) {
      const sel = '.' + escapeAttr(c);
      try {
        if (document.querySelectorAll(sel).length === 1) {
          result = sel;
          break;
        }
      } catch (e) { /* ignore invalid selector */ }
    }
    if (!result && classes.length) {
      result = el.tagName.toLowerCase() + '.' + escapeAttr(classes[0]);
    }
    if (!result && classes.length >= 2) {
      result = '.' + escapeAttr(classes[0]) + '.' + escapeAttr(classes[1]);
    }
    classSelectorCache.set(el, result);
    return result;
  }

  function structuralPath(el) {
    if (pathSelectorCache.has(el)) return pathSelectorCache.get(el);
    const parts = [];
    let node = el;
    while (node && node !== document.body && node.parentElement) {
      const tag = node.tagName.toLowerCase();
      const siblings = Array.from(node.parentElement.children).filter(c => c.tagName === node.tagName);
      if (siblings.length > 1) {
        const idx = siblings.indexOf(node) + 1;
        parts.unshift(tag + ':nth-of-type(' + idx + ')');
      } else {
        parts.unshift(tag);
      }
      node = node.parentElement;
    }
    const path = 'body > ' + parts.join(' > ');
    pathSelectorCache.set(el, path);
    return path;
  }

  function visibleText(el) {
    const t = (el.innerText || el.textContent || '').trim();
    return t.length ? t.slice(0, 64) : null;
  }

  function buildCandidates(el) {
    const candidates = [];
    try {
      for (const attr of ['data-testid', 'data-test', 'data-qa', 'data-cy']) {
        const v = el.getAttribute && el.getAttribute(attr);
        if (v) candidates.push({ type: 'attr', value: '[' + attr + '="' + escapeAttr(v) + '"]' });
      }

      const classSel = uniqueClassSelector(el);
      if (classSel) candidates.push({ type: 'css', value: classSel });

      candidates.push({ type: 'css', value: structuralPath(el) });

      for (const attr of ['name', 'title', 'alt']) {
        const v = el.getAttribute && el.getAttribute(attr);
        if (v) candidates.push({ type: 'attr', value: '[' + attr + '="' + escapeAttr(v) + '"]' });
      }

      const role = el.getAttribute && el.getAttribute('role');
      const ariaLabel = el.getAttribute && el.getAttribute('aria-label');
      if (role && ariaLabel) {
        candidates.push({ type: 'aria', value: role + '[name="' + ariaLabel + '"]' });
      } else if (ariaLabel) {
        candidates.push({ type: 'aria', value: 'textbox[name="' + ariaLabel + '"]' });
      }

      const tag = el.tagName ? el.tagName.toLowerCase() : '';
      if (['button', 'a', 'summary'].includes(tag)) {
        const text = visibleText(el);
        if (text) candidates.push({ type: 'text', value: text });
      }
    } catch (e) { /* best-effort: fall through with whatever we gathered */ }
    return candidates;
  }

  function isFormControl(tag) {
    return tag === 'input' || tag === 'textarea' || tag === 'select';
  }

  function buildTarget(el) {
    if (!el || !el.tagName) {
      return { selector: 'unknown', candidates: [], tag: 'unknown', ref: null };
    }
    const tag = el.tagName.toLowerCase();
    let candidates = [];
    let selector;
    try {
      candidates = buildCandidates(el);
      if (el.id) {
        try {
          if (document.querySelectorAll('#' + escapeAttr(el.id)).length === 1) {
            selector = '#' + escapeAttr(el.id);
          }
        } catch (e) { /* invalid id for CSS, ignore */ }
      }
      if (!selector) {
        const attrCandidate = candidates.find(c => c.type === 'attr');
        const cssCandidate = candidates.find(c => c.type === 'css');
        const chosen = attrCandidate || cssCandidate;
        if (chosen) {
          selector = (isFormControl(tag) && chosen.type === 'attr') ? tag + chosen.value : chosen.value;
        } else {
          selector = structuralPath(el);
        }
      }
    } catch (e) {
      selector = tag;
    }
    return { selector, candidates, tag, ref: refFor(el) };
  }

  // ---------------------------------------------------------------------
  // Status machine + wiring
  // ---------------------------------------------------------------------
  let status = 'idle'; // idle | recording | paused | stopping
  let sessionMeta = null;
  const sessionBuffer = { steps: [] };
  let batch = [];
  let batchTimer = null;
  const variablesOut = [];

  function send(payload) {
    try {
      if (typeof window.__RR_BINDING__ === 'function') {
        window.__RR_BINDING__(JSON.stringify(payload));
      }
      return true;
    } catch (e) {
      return false;
    }
  }

  function scheduleBatchFlush() {
    if (batchTimer) return;
    batchTimer = setTimeout(flushBatch, BATCH_MS);
  }

  function flushBatch() {
    batchTimer = null;
    if (!batch.length) return;
    const toSend = batch;
    batch = [];
    send({ kind: 'steps', steps: toSend });
  }

  function upsertIntoBatch(step) {
    const idx = batch.findIndex(s => s.id === step.id);
    if (idx >= 0) {
      batch[idx] = step;
    } else {
      batch.push(step);
    }
    scheduleBatchFlush();
  }

  function upsertIntoBuffer(step) {
    const idx = sessionBuffer.steps.findIndex(s => s.id === step.id);
    if (idx >= 0) {
      sessionBuffer.steps[idx] = step;
    } else {
      sessionBuffer.steps.push(step);
    }
  }

  function mintId() {
    return 'jstep_' + Date.now().toString(16) + '_' + Math.random().toString(16).slice(2, 10);
  }

  function emit(stepPartial) {
    const step = Object.assign({ id: mintId(), screenshotOnFail: false }, stepPartial);

    if (!isTop) {
      try {
        window.top.postMessage({ type: 'rr_iframe_event', payload: { href: location.href, step } }, '*');
      } catch (e) { /* cross-origin post failure: drop silently */ }
      return step;
    }

    upsertIntoBuffer(step);
    upsertIntoBatch(step);
    return step;
  }

  function emitVariable(varDef) {
    variablesOut.push(varDef);
    if (isTop) {
      send({ kind: 'variables', variables: [varDef] });
    }
  }

  // ---------------------------------------------------------------------
  // Click / double-click disambiguation
  // ---------------------------------------------------------------------
  let pendingClick = null;
  let pendingClickTimer = null;

  function flushPendingClick() {
    if (pendingClickTimer) {
      clearTimeout(pendingClickTimer);
      pendingClickTimer = null;
    }
    if (pendingClick) {
      emit(pendingClick);
      pendingClick = null;
    }
  }

  function isCheckboxOrRadio(el) {
    return el && el.tagName === 'INPUT' && (el.type === 'checkbox' || el.type === 'radio');
  }

  function handleClick(e) {
    if (status !== 'recording') return;
    const el = e.target;
    if (isCheckboxOrRadio(el)) return;

    if (el.tagName === 'A' && el.getAttribute('target') === '_blank') {
      const abs = new URL(el.getAttribute('href') || '', location.href).href;
      emit({ type: 'openTab', url: abs });
      emit({ type: 'switchTab', urlContains: abs });
      return;
    }

    if (e.detail >= 2) {
      if (pendingClickTimer) {
        clearTimeout(pendingClickTimer);
        pendingClickTimer = null;
      }
      pendingClick = null;
      emit({ type: 'dblclick', target: buildTarget(el) });
      return;
    }

    flushPendingClick();
    pendingClick = { type: 'click', target: buildTarget(el) };
    pendingClickTimer = setTimeout(flushPendingClick, DBLCLICK_THRESHOLD_MS);
  }

  // ---------------------------------------------------------------------
  // Fill (input/change/contenteditable)
  // ---------------------------------------------------------------------
  const pendingFills = new Map(); // ref -> { timer, selector, el, varKey }

  function isSensitive(el) {
    return el && el.tagName === 'INPUT' && SENSITIVE_TYPES.has((el.type || '').toLowerCase());
  }

  function elementValue(el) {
    if (el.isContentEditable) return el.innerText;
    return el.value;
  }

  function resolveComposedTarget(e) {
    if (typeof e.composedPath === 'function') {
      const path = e.composedPath();
      if (path && path.length) return path[0];
    }
    let node = document.activeElement;
    while (node && node.shadowRoot && node.shadowRoot.activeElement) {
      node = node.shadowRoot.activeElement;
    }
    return node || e.target;
  }

  function commitFill(el, varKeyHint) {
    if (!el) return;
    const ref = refFor(el);
    const target = buildTarget(el);
    let value = elementValue(el);
    let varKey = varKeyHint;

    if (isSensitive(el)) {
      varKey = varKey || (el.name || el.id || ('field_' + ref));
      emitVariable({ key: varKey, sensitive: true, default: '' });
      value = '{' + varKey + '}';
    }

    const existing = pendingFills.get(ref);
    const stepId = (existing && existing.stepId) || mintId();
    pendingFills.set(ref, { stepId, selector: target.selector });

    emit({ id: stepId, type: 'fill', target, value });
  }

  function scheduleFill(e) {
    if (status !== 'recording') return;
    const el = resolveComposedTarget(e);
    if (!el || e.isComposing) return;
    const editable = el.tagName === 'INPUT' || el.tagName === 'TEXTAREA' || el.isContentEditable;
    if (!editable) return;

    const ref = refFor(el);
    const existing = pendingFills.get(ref);
    if (existing && existing.timer) clearTimeout(existing.timer);

    const timer = setTimeout(() => {
      const entry = pendingFills.get(ref) || {};
      pendingFills.set(ref, { ...entry, timer: null });
      commitFill(el);
    }, INPUT_DEBOUNCE_MS);

    pendingFills.set(ref, { ...(existing || {}), el, timer });
  }

  // Flush a still-pending debounced fill as soon as the field loses focus,
  // rather than waiting out the rest of the 800ms timer.
  function handleFocusOut(e) {
    if (status !== 'recording') return;
    const el = e.target;
    if (!el) return;
    const ref = refFor(el);
    const entry = pendingFills.get(ref);
    if (!entry || !entry.timer) return;
    clearTimeout(entry.timer);
    pendingFills.set(ref, { ...entry, timer: null });
    commitFill(el);
  }

  function handleChange(e) {
    if (status !== 'recording') return;
    const el = e.target;
    if (el.tagName === 'SELECT') {
      emit({ type: 'fill', target: buildTarget(el), value: el.value });
      return;
    }
    if (isCheckboxOrRadio(el)) {
      emit({ type: 'fill', target: buildTarget(el), value: el.checked });
      return;
    }
    if (el.tagName === 'INPUT' && el.type === 'file') {
      const key = (el.name || el.id || 'file') + '_' + refFor(el);
      emitVariable({ key, sensitive: false, default: '' });
      emit({ type: 'fill', target: buildTarget(el), value: '{' + key + '}' });
    }
  }

  // ---------------------------------------------------------------------
  // Scroll
  // ---------------------------------------------------------------------
  let scrollTimer = null;
  let pendingScroll = null; // { source: 'document' | selector, mode, target }

  function scrollSource(el) {
    if (el === document || el === document.documentElement || el === window) return 'document';
    return buildTarget(el).selector;
  }

  function finalizeScroll() {
    scrollTimer = null;
    if (!pendingScroll) return;
    const { mode, offset, target } = pendingScroll;
    const last = sessionBuffer.steps[sessionBuffer.steps.length - 1];
    if (
      last && last.type === 'scroll' && last.mode === mode &&
      ((target && last.target && last.target.selector === target.selector) || (!target && !last.target))
    ) {
      last.offset = offset;
      upsertIntoBatch(last);
    } else {
      emit({ type: 'scroll', mode, offset, target });
    }
    pendingScroll = null;
  }

  function handleScroll(e) {
    if (status !== 'recording') return;
    const el = e.target === document ? document.documentElement : e.target;
    try {
      if (el && el.closest && el.closest('#' + OVERLAY_ID)) return;
    } catch (err) { /* ignore */ }

    const isDoc = e.target === document || el === document.documentElement;
    const mode = isDoc ? 'offset' : 'container';
    const offset = isDoc
      ? { x: window.scrollX, y: window.scrollY }
      : { x: el.scrollLeft, y: el.scrollTop };
    const target = isDoc ? undefined : buildTarget(el);

    pendingScroll = { mode, offset, target };
    if (scrollTimer) clearTimeout(scrollTimer);
    scrollTimer = setTimeout(finalizeScroll, SCROLL_DEBOUNCE_MS);
  }

  // ---------------------------------------------------------------------
  // Keys
  // ---------------------------------------------------------------------
  function isEditable(el) {
    return el && (el.tagName === 'INPUT' || el.tagName === 'TEXTAREA' || el.isContentEditable);
  }

  function comboString(e) {
    const parts = [];
    if (e.ctrlKey) parts.push('Ctrl');
    if (e.altKey) parts.push('Alt');
    if (e.shiftKey) parts.push('Shift');
    if (e.metaKey) parts.push('Meta');
    let key = e.key;
    if (key === 'Escape') key = 'Esc';
    else if (key === ' ') key = 'Space';
    else if (key.length === 1) key = key.toUpperCase();
    parts.push(key);
    return parts.join('+');
  }

  function handleKeydown(e) {
    if (status !== 'recording' || e.repeat) return;
    const el = e.target;
    const editable = isEditable(el);
    const hasModifier = e.ctrlKey || e.altKey || e.shiftKey || e.metaKey;

    if (editable) {
      if (['Enter', 'Escape', 'Tab'].includes(e.key)) {
        emit({ type: 'key', keys: comboString(e), target: buildTarget(el) });
      }
      return;
    }

    if (['Enter', 'Escape', 'Tab'].includes(e.key) || hasModifier) {
      emit({ type: 'key', keys: comboString(e), target: el && el.tagName ? buildTarget(el) : undefined });
    }
  }

  // ---------------------------------------------------------------------
  // Cross-frame aggregation (top frame only)
  // ---------------------------------------------------------------------
  function findFrameElementForWindow(win) {
    const frames = document.querySelectorAll('iframe, frame');
    for (const f of frames) {
      try {
        if (f.contentWindow === win) return f;
      } catch (e) { /* detached / cross-origin access error */ }
    }
    return null;
  }

  function isSameOriginFrame(frameEl) {
    try {
      // Throws for a cross-origin frame; a same-origin one resolves cleanly.
      return frameEl.contentWindow.location.origin === location.origin;
    } catch (e) {
      return false;
    }
  }

  function handleMessage(e) {
    if (status !== 'recording' && status !== 'stopping') return;
    const data = e.data;
    if (!data || data.type !== 'rr_iframe_event') return;

    const frameEl = findFrameElementForWindow(e.source);
    if (!frameEl) return; // auth rejection: unmatched source

    if (isSameOriginFrame(frameEl) && e.origin !== location.origin && e.origin !== 'null') {
      return; // auth rejection: same-origin frame, origin mismatch
    }

    const step = data.payload && data.payload.step;
    if (!step) return;

    const frameTarget = buildTarget(frameEl);
    const inner = step.target;
    if (inner) {
      const composite = frameTarget.selector + ' |> ' + inner.selector;
      const candidates = [{ type: 'css', value: composite }, ...(inner.candidates || [])];
      step.target = { selector: composite, candidates, tag: inner.tag, ref: null };
    }
    if (!step.id) step.id = mintId();

    upsertIntoBuffer(step);
    upsertIntoBatch(step);
  }

  // ---------------------------------------------------------------------
  // Listener installation
  // ---------------------------------------------------------------------
  document.addEventListener('click', handleClick, true);
  document.addEventListener('input', scheduleFill, true);
  document.addEventListener('focusout', handleFocusOut, true);
  document.addEventListener('change', handleChange, true);
  document.addEventListener('scroll', handleScroll, { capture: true, passive: true });
  document.addEventListener('keydown', handleKeydown, true);

  if (isTop) {
    window.addEventListener('message', handleMessage);
  }

  // ---------------------------------------------------------------------
  // Control entry point: window.__rrControl(json) -> Promise<jsonAck>
  // ---------------------------------------------------------------------
  function finalizePendingFill() {
    for (const [ref, entry] of pendingFills) {
      if (entry.timer) {
        clearTimeout(entry.timer);
        if (entry.el && entry.el.isConnected) commitFill(entry.el);
      }
    }
    pendingFills.clear();
  }

  async function doStop() {
    status = 'stopping';
    finalizePendingFill();
    if (pendingScroll) finalizeScroll();
    if (pendingClickTimer) flushPendingClick();

    let stepsAck = true;
    if (batch.length) {
      const toSend = batch;
      batch = [];
      stepsAck = send({ kind: 'steps', steps: toSend });
    }
    let variablesAck = true;
    if (variablesOut.length) {
      variablesAck = send({ kind: 'variables', variables: variablesOut.splice(0) });
    }

    document.removeEventListener('click', handleClick, true);
    document.removeEventListener('input', scheduleFill, true);
    document.removeEventListener('focusout', handleFocusOut, true);
    document.removeEventListener('change', handleChange, true);
    document.removeEventListener('scroll', handleScroll, { capture: true });
    document.removeEventListener('keydown', handleKeydown, true);
    if (isTop) window.removeEventListener('message', handleMessage);

    const overlay = document.getElementById(OVERLAY_ID);
    if (overlay) overlay.remove();

    status = 'idle';
    return { ack: stepsAck && variablesAck, steps: sessionBuffer.steps.length, variables: variablesOut.length };
  }

  window.__rrControl = function (json) {
    const msg = JSON.parse(json);
    switch (msg.cmd) {
      case 'start':
        sessionMeta = msg;
        if (status !== 'recording') status = 'recording';
        return Promise.resolve(JSON.stringify({ ok: true }));
      case 'pause':
        if (status === 'recording') status = 'paused';
        return Promise.resolve(JSON.stringify({ ok: true }));
      case 'resume':
        if (status === 'paused') status = 'recording';
        return Promise.resolve(JSON.stringify({ ok: true }));
      case 'stop':
        return doStop().then(r => JSON.stringify(r));
      case 'ping':
        return Promise.resolve(JSON.stringify({ status: 'pong' }));
      default:
        return Promise.resolve(JSON.stringify({ success: false, error: 'unknown command' }));
    }
  };

  return true;
})();
"#;
